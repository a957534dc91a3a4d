//! Module `index` implement a single secondary index, a mapping from
//! normalized key to the set of entry-ids holding that key.
//!
//! Every key tracks its id-set exactly until the set would cross the
//! configured entry-limit. At that point the key degrades to the
//! match-all sentinel, a safe over-approximation that turns the key
//! non-selective instead of unboundedly expensive. The degradation is
//! one-way, deleting entries later does not revert the key, only an
//! explicit index rebuild does.

use std::ops::Bound;

use crate::{
    entry::Entry,
    idset::{EntryId, IdSet},
    indexer::Indexer,
    kvs::{Environment, Txn},
    Result,
};

/// Default ceiling on the number of ids tracked exactly per key.
pub const DEFAULT_ENTRY_LIMIT: usize = 4000;

/// A secondary index over one `(attribute, capability)` pair of an
/// [crate::EntryContainer].
#[derive(Clone)]
pub struct Index {
    pub indexer: Indexer,
    /// Backing namespace, `<base>_<attr>.<kind>`.
    pub tree: String,
    pub entry_limit: usize,
}

impl Index {
    pub fn new(prefix: &str, indexer: Indexer, entry_limit: usize) -> Index {
        let tree = format!("{}_{}", prefix, indexer);
        Index {
            indexer,
            tree,
            entry_limit,
        }
    }

    /// Read the id-set under `key` from committed state. Absent keys read
    /// as the empty exact set.
    pub fn read_key(&self, env: &Environment, key: &[u8]) -> Result<IdSet> {
        match env.get(&self.tree, key)? {
            Some(data) => IdSet::from_bytes(&data),
            None => Ok(IdSet::new()),
        }
    }

    /// Union of the id-sets for every key in `[lo, hi]`. Used by ordering
    /// and short-substring evaluation. A degraded key in range degrades
    /// the whole answer.
    pub fn read_range(
        &self,
        env: &Environment,
        lo: Bound<Vec<u8>>,
        hi: Bound<Vec<u8>>,
    ) -> Result<IdSet> {
        let mut acc = IdSet::new();
        for (_, data) in env.range(&self.tree, lo, hi)?.into_iter() {
            acc = acc.union(IdSet::from_bytes(&data)?);
            if acc.is_all() {
                break;
            }
        }
        Ok(acc)
    }

    /// Union of the id-sets for every key starting with `prefix`.
    pub fn read_prefix(&self, env: &Environment, prefix: &[u8]) -> Result<IdSet> {
        let (lo, hi) = prefix_bounds(prefix);
        self.read_range(env, lo, hi)
    }

    /// Add `id` under `key` within the caller's transaction. Crossing the
    /// entry-limit replaces the id list with the sentinel.
    pub fn insert(&self, txn: &mut Txn, key: &[u8], id: EntryId) -> Result<()> {
        let mut set = match txn.get(&self.tree, key)? {
            Some(data) => IdSet::from_bytes(&data)?,
            None => IdSet::new(),
        };
        if set.is_all() {
            return Ok(());
        }
        if !set.contains(id) && set.len() == Some(self.entry_limit) {
            log::debug!(
                target: "index",
                "{} key {:?} exceeded entry-limit {}", self.tree, key, self.entry_limit
            );
            set.degrade();
        } else {
            set.insert(id);
        }
        txn.put(&self.tree, key.to_vec(), set.to_bytes()?);
        Ok(())
    }

    /// Remove `id` from under `key`. A no-op for degraded keys, their
    /// exact membership is no longer tracked.
    pub fn remove(&self, txn: &mut Txn, key: &[u8], id: EntryId) -> Result<()> {
        let mut set = match txn.get(&self.tree, key)? {
            Some(data) => IdSet::from_bytes(&data)?,
            None => return Ok(()),
        };
        if set.is_all() {
            return Ok(());
        }
        set.remove(id);
        if set.is_empty() {
            txn.delete(&self.tree, key.to_vec());
        } else {
            txn.put(&self.tree, key.to_vec(), set.to_bytes()?);
        }
        Ok(())
    }

    /// Insert every key generated for `entry`, the add path.
    pub fn index_entry_insert(
        &self,
        txn: &mut Txn,
        entry: &Entry,
        id: EntryId,
    ) -> Result<()> {
        for key in self.indexer.index_entry(entry).iter() {
            self.insert(txn, key, id)?;
        }
        Ok(())
    }

    /// Remove every key generated for `entry`, the delete path.
    pub fn index_entry_remove(
        &self,
        txn: &mut Txn,
        entry: &Entry,
        id: EntryId,
    ) -> Result<()> {
        for key in self.indexer.index_entry(entry).iter() {
            self.remove(txn, key, id)?;
        }
        Ok(())
    }

    /// Apply the old/new key delta, the replace and rename path.
    pub fn apply_diff(
        &self,
        txn: &mut Txn,
        old: &Entry,
        new: &Entry,
        id: EntryId,
    ) -> Result<()> {
        for (key, insert) in self.indexer.diff_keys(old, new).iter() {
            match insert {
                true => self.insert(txn, key, id)?,
                false => self.remove(txn, key, id)?,
            }
        }
        Ok(())
    }

    /// Bulk-merge a run of ids under one key, the import merge path.
    /// Applies the same entry-limit policy as the transactional insert,
    /// without a transaction.
    pub fn load_merged(&self, env: &Environment, key: &[u8], ids: Vec<u64>) -> Result<()> {
        let mut set = match env.get(&self.tree, key)? {
            Some(data) => IdSet::from_bytes(&data)?,
            None => IdSet::new(),
        };
        if !set.is_all() {
            for id in ids.into_iter() {
                if !set.contains(EntryId(id)) && set.len() == Some(self.entry_limit) {
                    set.degrade();
                    break;
                }
                set.insert(EntryId(id));
            }
        }
        env.put(&self.tree, key.to_vec(), set.to_bytes()?)?;
        Ok(())
    }
}

/// Byte-range bounds covering exactly the keys prefixed by `prefix`.
pub fn prefix_bounds(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let lo = Bound::Included(prefix.to_vec());
    let mut hi = prefix.to_vec();
    let hi = loop {
        match hi.pop() {
            Some(byte) if byte < 0xff => {
                hi.push(byte + 1);
                break Bound::Excluded(hi);
            }
            Some(_) => continue, // carry past 0xff
            None => break Bound::Unbounded,
        }
    };
    (lo, hi)
}

#[cfg(test)]
#[path = "index_test.rs"]
mod index_test;
