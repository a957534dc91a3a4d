//! Package `kvs` implement the ordered key-value environment consumed by
//! the storage core.
//!
//! The core depends only on a narrow contract: named, byte-ordered
//! namespaces with get/put/delete, range scans over a point-in-time
//! snapshot, transactions with atomic commit, and a durable checkpoint.
//! The [Environment] here keeps the namespaces in ordered memory maps
//! under a latch-and-spin lock and makes them durable through a
//! checksummed checkpoint file, good enough for embedded deployments and
//! for exercising every upper layer. An engine with its own B-tree/log
//! machinery can replace this module without the containers noticing, as
//! long as it honors the same surface.

mod env;

pub use env::{Durability, Environment, Txn};

#[cfg(test)]
#[path = "env_test.rs"]
mod env_test;
