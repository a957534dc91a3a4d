//! Package `indexer` implement key generation for attribute indexes.
//!
//! An indexer converts an attribute's value set into normalized index
//! keys, and computes the key delta between the old and new rendition of
//! an entry for modify/replace. The variants form a closed set, equality,
//! presence, substring, ordering and approximate, dispatched from the
//! container's configured index list.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, result,
    str::FromStr,
    sync::Arc,
};

use crate::{entry::Entry, schema::AttrType, Error, Result};

/// Single presence key, presence is a per-attribute fact, not per-value.
pub const PRESENCE_KEY: &[u8] = b"+";

/// Maximum substring-key window, longer match fragments are intersected
/// window by window at search time.
pub const SUBSTRING_KEY_LEN: usize = 6;

/// Index capability over one attribute type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    Equality,
    Presence,
    Substring,
    Ordering,
    Approximate,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        let name = match self {
            IndexKind::Equality => "equality",
            IndexKind::Presence => "presence",
            IndexKind::Substring => "substring",
            IndexKind::Ordering => "ordering",
            IndexKind::Approximate => "approximate",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for IndexKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<IndexKind> {
        match s {
            "equality" | "eq" => Ok(IndexKind::Equality),
            "presence" | "pres" => Ok(IndexKind::Presence),
            "substring" | "sub" => Ok(IndexKind::Substring),
            "ordering" => Ok(IndexKind::Ordering),
            "approximate" | "approx" => Ok(IndexKind::Approximate),
            _ => err_at!(InvalidInput, msg: "index kind {:?}", s),
        }
    }
}

/// Key generator for one `(attribute, capability)` pair.
///
/// A value that fails to normalize is skipped for indexing purposes only,
/// it never blocks the entry write, syntax enforcement is schema's
/// business upstream.
#[derive(Clone)]
pub struct Indexer {
    pub kind: IndexKind,
    pub atype: Arc<AttrType>,
}

impl fmt::Display for Indexer {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}.{}", self.atype.name, self.kind)
    }
}

impl Indexer {
    pub fn new(kind: IndexKind, atype: Arc<AttrType>) -> Indexer {
        Indexer { kind, atype }
    }

    /// Full key set for an entry, used on add and on full rebuild.
    pub fn index_entry(&self, entry: &Entry) -> BTreeSet<Vec<u8>> {
        let mut keys = BTreeSet::new();
        let attr = match entry.attr(&self.atype.name) {
            Some(attr) => attr,
            None => return keys,
        };

        match self.kind {
            IndexKind::Presence => {
                keys.insert(PRESENCE_KEY.to_vec());
            }
            _ => {
                for value in attr.values.iter() {
                    match self.keys_for_value(value) {
                        Ok(vks) => keys.extend(vks),
                        Err(err) => {
                            log::debug!(
                                target: "indexer",
                                "skip unnormalizable value for {}: {}", self, err
                            );
                        }
                    }
                }
            }
        }
        keys
    }

    /// Symmetric-difference key delta between the old and new rendition
    /// of an entry. `true` marks an insert, `false` a delete. A key
    /// present on both sides contributes no change, inserting then
    /// deleting the same key is a no-op.
    pub fn diff_keys(&self, old: &Entry, new: &Entry) -> BTreeMap<Vec<u8>, bool> {
        let old_keys = self.index_entry(old);
        let new_keys = self.index_entry(new);

        let mut delta = BTreeMap::new();
        for key in old_keys.difference(&new_keys) {
            delta.insert(key.clone(), false);
        }
        for key in new_keys.difference(&old_keys) {
            delta.insert(key.clone(), true);
        }
        delta
    }

    /// Keys contributed by a single raw value.
    pub fn keys_for_value(&self, value: &[u8]) -> Result<BTreeSet<Vec<u8>>> {
        let mut keys = BTreeSet::new();
        match self.kind {
            IndexKind::Equality => {
                keys.insert(self.atype.normalize(value)?);
            }
            IndexKind::Presence => {
                keys.insert(PRESENCE_KEY.to_vec());
            }
            IndexKind::Ordering => {
                keys.insert(self.atype.ordering_key(value)?);
            }
            IndexKind::Approximate => {
                keys.insert(self.atype.approximate_key(value)?);
            }
            IndexKind::Substring => {
                let norm = self.atype.normalize(value)?;
                for key in substring_keys(&norm) {
                    keys.insert(key);
                }
            }
        }
        Ok(keys)
    }
}

/// Substring windows of a normalized value, one key per position, each at
/// most [SUBSTRING_KEY_LEN] bytes.
pub fn substring_keys(norm: &[u8]) -> Vec<Vec<u8>> {
    let mut keys = vec![];
    for i in 0..norm.len() {
        let j = (i + SUBSTRING_KEY_LEN).min(norm.len());
        keys.push(norm[i..j].to_vec());
    }
    keys
}

/// Search-side decomposition of one substring-filter fragment: fragments
/// of window size and above are matched window by window, shorter
/// fragments are resolved by prefix scan in the index.
pub fn substring_windows(norm: &[u8]) -> Vec<Vec<u8>> {
    if norm.len() < SUBSTRING_KEY_LEN {
        return vec![];
    }
    (0..=(norm.len() - SUBSTRING_KEY_LEN))
        .map(|i| norm[i..i + SUBSTRING_KEY_LEN].to_vec())
        .collect()
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
