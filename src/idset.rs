//! Module `idset` implement the entry-id surrogate key and id-set types.
//!
//! An [EntryId] is never reused, even after delete. Id-sets are kept
//! sorted so that set union/intersection, and bulk-merge during import,
//! run as linear scans.

use cbordata::Cborize;

use std::convert::TryFrom;

use crate::{Error, Result};

const IDSET_VER: u32 = 0x00010001;

/// Surrogate integer key for an entry, stable for its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub u64);

impl EntryId {
    /// Big-endian key rendition, preserves numeric order under the
    /// store's byte ordering.
    pub fn to_key(self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }

    pub fn from_key(key: &[u8]) -> Result<EntryId> {
        let buf = err_at!(FailConvert, <[u8; 8]>::try_from(key))?;
        Ok(EntryId(u64::from_be_bytes(buf)))
    }
}

// on-disk rendition of an id-set.
#[derive(Clone, Debug, Cborize)]
struct IdSetRec {
    all: bool,
    ids: Vec<u64>,
}

impl IdSetRec {
    const ID: u32 = IDSET_VER;
}

/// A set of entry-ids under one index key, either tracked exactly or
/// degraded to the match-all sentinel once past the index entry-limit.
#[derive(Clone, Debug, PartialEq)]
pub enum IdSet {
    /// Limit-exceeded sentinel, conservatively matches every entry.
    All,
    /// Exact sorted id list.
    Ids { ids: Vec<u64> },
}

impl IdSet {
    /// Serialize to the on-disk CBOR rendition.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let rec = match self {
            IdSet::All => IdSetRec { all: true, ids: vec![] },
            IdSet::Ids { ids } => IdSetRec { all: false, ids: ids.clone() },
        };
        crate::util::into_cbor_bytes(rec)
    }

    /// Deserialize from the on-disk CBOR rendition.
    pub fn from_bytes(data: &[u8]) -> Result<IdSet> {
        let (rec, _) = crate::util::from_cbor_bytes::<IdSetRec>(data)?;
        Ok(match rec.all {
            true => IdSet::All,
            false => IdSet::Ids { ids: rec.ids },
        })
    }

    pub fn new() -> IdSet {
        IdSet::Ids { ids: vec![] }
    }

    pub fn from_ids(mut ids: Vec<u64>) -> IdSet {
        ids.sort_unstable();
        ids.dedup();
        IdSet::Ids { ids }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, IdSet::All)
    }

    /// Number of ids tracked, None for the sentinel.
    pub fn len(&self) -> Option<usize> {
        match self {
            IdSet::All => None,
            IdSet::Ids { ids } => Some(ids.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub fn contains(&self, id: EntryId) -> bool {
        match self {
            IdSet::All => true,
            IdSet::Ids { ids } => ids.binary_search(&id.0).is_ok(),
        }
    }

    /// Add an id. No-op on the sentinel. Return whether the set changed.
    pub fn insert(&mut self, id: EntryId) -> bool {
        match self {
            IdSet::All => false,
            IdSet::Ids { ids } => match ids.binary_search(&id.0) {
                Ok(_) => false,
                Err(off) => {
                    ids.insert(off, id.0);
                    true
                }
            },
        }
    }

    /// Remove an id. No-op on the sentinel, the exact membership is no
    /// longer tracked there.
    pub fn remove(&mut self, id: EntryId) -> bool {
        match self {
            IdSet::All => false,
            IdSet::Ids { ids } => match ids.binary_search(&id.0) {
                Ok(off) => {
                    ids.remove(off);
                    true
                }
                Err(_) => false,
            },
        }
    }

    /// Degrade to the limit-exceeded sentinel. One-way, a degraded key is
    /// recovered only by an explicit index rebuild.
    pub fn degrade(&mut self) {
        *self = IdSet::All;
    }

    pub fn iter(&self) -> impl Iterator<Item = EntryId> + '_ {
        let ids: &[u64] = match self {
            IdSet::All => &[],
            IdSet::Ids { ids } => ids.as_slice(),
        };
        ids.iter().map(|id| EntryId(*id))
    }

    /// Set intersection. The sentinel is the identity element.
    pub fn intersect(self, other: IdSet) -> IdSet {
        match (self, other) {
            (IdSet::All, other) => other,
            (me, IdSet::All) => me,
            (IdSet::Ids { ids: a }, IdSet::Ids { ids: b }) => {
                let mut out = Vec::with_capacity(a.len().min(b.len()));
                let (mut i, mut j) = (0_usize, 0_usize);
                while i < a.len() && j < b.len() {
                    match a[i].cmp(&b[j]) {
                        std::cmp::Ordering::Less => i += 1,
                        std::cmp::Ordering::Greater => j += 1,
                        std::cmp::Ordering::Equal => {
                            out.push(a[i]);
                            i += 1;
                            j += 1;
                        }
                    }
                }
                IdSet::Ids { ids: out }
            }
        }
    }

    /// Set union. The sentinel absorbs everything.
    pub fn union(self, other: IdSet) -> IdSet {
        match (self, other) {
            (IdSet::All, _) | (_, IdSet::All) => IdSet::All,
            (IdSet::Ids { ids: a }, IdSet::Ids { ids: b }) => {
                let mut out = Vec::with_capacity(a.len() + b.len());
                let (mut i, mut j) = (0_usize, 0_usize);
                while i < a.len() && j < b.len() {
                    match a[i].cmp(&b[j]) {
                        std::cmp::Ordering::Less => {
                            out.push(a[i]);
                            i += 1;
                        }
                        std::cmp::Ordering::Greater => {
                            out.push(b[j]);
                            j += 1;
                        }
                        std::cmp::Ordering::Equal => {
                            out.push(a[i]);
                            i += 1;
                            j += 1;
                        }
                    }
                }
                out.extend_from_slice(&a[i..]);
                out.extend_from_slice(&b[j..]);
                IdSet::Ids { ids: out }
            }
        }
    }
}

impl Default for IdSet {
    fn default() -> IdSet {
        IdSet::new()
    }
}

#[cfg(test)]
#[path = "idset_test.rs"]
mod idset_test;
