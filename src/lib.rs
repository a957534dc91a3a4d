//! Dirstore implement an embedded, transactional entry-storage engine for
//! directory services. Entries are identified by their distinguished-name,
//! [DN][dn], and persisted in an ordered key-value environment along with a
//! set of attribute indexes that make filtered search fast.
//!
//! Every entry is assigned a dense, monotonically increasing 64-bit
//! [EntryId], the stable surrogate key used by all secondary structures
//! instead of the DN. Five logical namespaces are maintained per base-DN:
//!
//! * `dn2id`, mapping normalized DN to EntryId.
//! * `id2entry`, the canonical serialized entry store.
//! * `id2children` and `id2subtree`, mapping a parent id to its immediate
//!   children, and to all its descendants.
//! * One namespace per configured attribute index.
//!
//! **Transactional path**. [EntryContainer] exposes add/delete/replace/
//! rename/search, each executed as a single store transaction so that a
//! failed operation never leaves a partial index update behind.
//!
//! **Bulk path**. The [import] pipeline reads an LDIF stream, assigns ids
//! sequentially so that parent-before-child ordering is honored, extracts
//! index keys on worker threads into buffered sorted runs, and merges the
//! runs into the final indexes in key order.
//!
//! [dn]: https://tools.ietf.org/html/rfc4514

use std::{error, fmt, result};

/// Type alias for Result return type, used by this package.
pub type Result<T> = result::Result<T, Error>;

/// Error variants that are returned by this package's API.
///
/// Each variant carries a prefix, typically identifying the
/// error location, and an error message.
#[derive(Clone, Debug)]
pub enum Error {
    Fatal(String, String),
    FailConvert(String, String),
    FailCbor(String, String),
    IOError(String, String),
    InvalidFile(String, String),
    InvalidInput(String, String),
    IPCFail(String, String),
    ThreadFail(String, String),
    KeyNotFound(String, String),
    EntryNotFound(String, String),
    ParentNotFound(String, String),
    EntryExists(String, String),
    NotLeaf(String, String),
    Unwilling(String, String),
    StoreFail(String, String),
    Corruption(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            Fatal(p, msg) => write!(f, "{} Fatal: {}", p, msg),
            FailConvert(p, msg) => write!(f, "{} FailConvert: {}", p, msg),
            FailCbor(p, msg) => write!(f, "{} FailCbor: {}", p, msg),
            IOError(p, msg) => write!(f, "{} IOError: {}", p, msg),
            InvalidFile(p, msg) => write!(f, "{} InvalidFile: {}", p, msg),
            InvalidInput(p, msg) => write!(f, "{} InvalidInput: {}", p, msg),
            IPCFail(p, msg) => write!(f, "{} IPCFail: {}", p, msg),
            ThreadFail(p, msg) => write!(f, "{} ThreadFail: {}", p, msg),
            KeyNotFound(p, msg) => write!(f, "{} KeyNotFound: {}", p, msg),
            EntryNotFound(p, msg) => write!(f, "{} EntryNotFound: {}", p, msg),
            ParentNotFound(p, msg) => write!(f, "{} ParentNotFound: {}", p, msg),
            EntryExists(p, msg) => write!(f, "{} EntryExists: {}", p, msg),
            NotLeaf(p, msg) => write!(f, "{} NotLeaf: {}", p, msg),
            Unwilling(p, msg) => write!(f, "{} Unwilling: {}", p, msg),
            StoreFail(p, msg) => write!(f, "{} StoreFail: {}", p, msg),
            Corruption(p, msg) => write!(f, "{} Corruption: {}", p, msg),
        }
    }
}

impl error::Error for Error {}

impl Error {
    /// Whether this error is a normal negative result, surfaced to the
    /// caller as-is, as opposed to a store/environment fault.
    pub fn is_recoverable(&self) -> bool {
        use Error::*;

        matches!(
            self,
            KeyNotFound(_, _)
                | EntryNotFound(_, _)
                | ParentNotFound(_, _)
                | EntryExists(_, _)
                | NotLeaf(_, _)
                | Unwilling(_, _)
        )
    }
}

#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err(Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err(Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err(Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

pub mod backend;
pub mod config;
pub mod container;
pub mod dn;
pub mod entry;
pub mod idset;
pub mod import;
pub mod index;
pub mod indexer;
pub mod kvs;
pub mod ldif;
pub mod root;
pub mod schema;
pub mod util;

pub use crate::backend::Backend;
pub use crate::config::{BackendConfig, ImportConfig, ImportMode, IndexSpec};
pub use crate::container::{EntryContainer, Filter, Scope, SearchRequest, VerifyReport};
pub use crate::dn::Dn;
pub use crate::entry::{Entry, ModType, Modification};
pub use crate::idset::{EntryId, IdSet};
pub use crate::import::ImportReport;
pub use crate::indexer::IndexKind;
pub use crate::kvs::Durability;
pub use crate::root::RootContainer;
pub use crate::schema::{AttrType, Schema};
