//! Module `search` implement indexed search evaluation over an
//! [EntryContainer].
//!
//! Evaluation is two phased. First the filter is resolved against the
//! secondary indexes into a candidate id-set, an over-approximation that
//! may include false positives from degraded keys or unindexed terms.
//! Then every candidate entry is fetched and re-checked against the full
//! filter, so index inaccuracy can never surface in results.

use std::ops::Bound;

use crate::{
    container::EntryContainer,
    dn::Dn,
    entry::Entry,
    idset::{EntryId, IdSet},
    indexer::{self, IndexKind, PRESENCE_KEY, SUBSTRING_KEY_LEN},
    schema::AttrType,
    Error, Result,
};

/// Search scope relative to the search base.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scope {
    /// The base entry alone.
    Base,
    /// Immediate children of the base entry, excluding the base.
    One,
    /// The base entry and all its descendants.
    Subtree,
}

/// Search filter, the assertion tree evaluated against each entry.
#[derive(Clone, Debug)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality { attr: String, value: Vec<u8> },
    Present { attr: String },
    Substring { attr: String, initial: Option<Vec<u8>>, any: Vec<Vec<u8>>, tail: Option<Vec<u8>> },
    Ge { attr: String, value: Vec<u8> },
    Le { attr: String, value: Vec<u8> },
    Approx { attr: String, value: Vec<u8> },
}

/// One search operation.
#[derive(Clone, Debug)]
pub struct SearchRequest {
    pub base: Dn,
    pub scope: Scope,
    pub filter: Filter,
    pub size_limit: Option<usize>,
}

impl SearchRequest {
    pub fn new(base: Dn, scope: Scope, filter: Filter) -> SearchRequest {
        SearchRequest {
            base,
            scope,
            filter,
            size_limit: None,
        }
    }

    pub fn set_size_limit(&mut self, limit: usize) -> &mut SearchRequest {
        self.size_limit = Some(limit);
        self
    }
}

impl EntryContainer {
    /// Evaluate `req` and return matching `(id, entry)` pairs.
    pub fn search(&self, req: &SearchRequest) -> Result<Vec<(EntryId, Entry)>> {
        let _r = self.latch.read();

        let txn = self.env.txn();
        let base_id = match self.txn_get_id(&txn, &req.base)? {
            Some(id) => id,
            None => return err_at!(EntryNotFound, msg: "{}", req.base),
        };

        // the scope set is always exact, children/subtree never degrade.
        let scope_ids = match req.scope {
            Scope::Base => IdSet::from_ids(vec![base_id.0]),
            Scope::One => self.txn_read_set(&txn, &self.id2children, base_id)?,
            Scope::Subtree => {
                let mut set = self.txn_read_set(&txn, &self.id2subtree, base_id)?;
                set.insert(base_id);
                set
            }
        };

        let candidates = self.candidates(&req.filter)?.intersect(scope_ids);
        debug_assert!(!candidates.is_all());

        let mut out = vec![];
        for id in candidates.iter() {
            let entry = match self.txn_get_entry(&txn, id)? {
                Some(entry) => entry,
                None => return err_at!(Corruption, msg: "candidate id {:?} unbacked", id),
            };
            // mandatory re-check, candidates over-approximate.
            if self.filter_matches(&req.filter, &entry)? {
                out.push((id, entry));
                if let Some(limit) = req.size_limit {
                    if out.len() >= limit {
                        break;
                    }
                }
            }
        }
        Ok(out)
    }

    // resolve a filter into candidate ids. `All` means "cannot narrow",
    // unindexed attributes, degraded keys and negation all land there.
    fn candidates(&self, filter: &Filter) -> Result<IdSet> {
        let set = match filter {
            Filter::And(parts) => {
                let mut acc = IdSet::All;
                for part in parts.iter() {
                    acc = acc.intersect(self.candidates(part)?);
                    if acc.is_empty() {
                        break;
                    }
                }
                acc
            }
            Filter::Or(parts) => {
                let mut acc = IdSet::new();
                for part in parts.iter() {
                    acc = acc.union(self.candidates(part)?);
                    if acc.is_all() {
                        break;
                    }
                }
                acc
            }
            Filter::Not(_) => IdSet::All,
            Filter::Equality { attr, value } => {
                match self.find_index(attr, IndexKind::Equality) {
                    Some(index) => match index.indexer.atype.normalize(value) {
                        Ok(key) => index.read_key(&self.env, &key)?,
                        Err(_) => IdSet::All,
                    },
                    None => IdSet::All,
                }
            }
            Filter::Present { attr } => match self.find_index(attr, IndexKind::Presence) {
                Some(index) => index.read_key(&self.env, PRESENCE_KEY)?,
                None => IdSet::All,
            },
            Filter::Ge { attr, value } => match self.find_index(attr, IndexKind::Ordering) {
                Some(index) => match index.indexer.atype.ordering_key(value) {
                    Ok(key) => {
                        index.read_range(&self.env, Bound::Included(key), Bound::Unbounded)?
                    }
                    Err(_) => IdSet::All,
                },
                None => IdSet::All,
            },
            Filter::Le { attr, value } => match self.find_index(attr, IndexKind::Ordering) {
                Some(index) => match index.indexer.atype.ordering_key(value) {
                    Ok(key) => {
                        index.read_range(&self.env, Bound::Unbounded, Bound::Included(key))?
                    }
                    Err(_) => IdSet::All,
                },
                None => IdSet::All,
            },
            Filter::Approx { attr, value } => {
                match self.find_index(attr, IndexKind::Approximate) {
                    Some(index) => match index.indexer.atype.approximate_key(value) {
                        Ok(key) => index.read_key(&self.env, &key)?,
                        Err(_) => IdSet::All,
                    },
                    None => IdSet::All,
                }
            }
            Filter::Substring { attr, initial, any, tail } => {
                match self.find_index(attr, IndexKind::Substring) {
                    Some(index) => {
                        let mut acc = IdSet::All;
                        let mut frags: Vec<&Vec<u8>> = vec![];
                        frags.extend(initial.iter());
                        frags.extend(any.iter());
                        frags.extend(tail.iter());
                        for frag in frags.into_iter() {
                            let set = match index.indexer.atype.normalize(frag) {
                                Ok(norm) => self.substring_candidates(index, &norm)?,
                                Err(_) => IdSet::All,
                            };
                            acc = acc.intersect(set);
                            if acc.is_empty() {
                                break;
                            }
                        }
                        acc
                    }
                    None => IdSet::All,
                }
            }
        };
        Ok(set)
    }

    // one substring fragment. At window size and above, intersect the
    // id-sets of each full window, below it a prefix scan over the index.
    fn substring_candidates(&self, index: &crate::index::Index, norm: &[u8]) -> Result<IdSet> {
        if norm.len() >= SUBSTRING_KEY_LEN {
            let mut acc = IdSet::All;
            for window in indexer::substring_windows(norm).into_iter() {
                acc = acc.intersect(index.read_key(&self.env, &window)?);
                if acc.is_empty() {
                    break;
                }
            }
            Ok(acc)
        } else {
            index.read_prefix(&self.env, norm)
        }
    }

    fn find_index(&self, attr: &str, kind: IndexKind) -> Option<&crate::index::Index> {
        let attr = attr.to_lowercase();
        self.indexes
            .iter()
            .find(|ix| ix.indexer.atype.name == attr && ix.indexer.kind == kind)
    }

    /// Authoritative filter evaluation against one entry.
    pub fn filter_matches(&self, filter: &Filter, entry: &Entry) -> Result<bool> {
        let ok = match filter {
            Filter::And(parts) => {
                let mut ok = true;
                for part in parts.iter() {
                    if !self.filter_matches(part, entry)? {
                        ok = false;
                        break;
                    }
                }
                ok
            }
            Filter::Or(parts) => {
                let mut ok = false;
                for part in parts.iter() {
                    if self.filter_matches(part, entry)? {
                        ok = true;
                        break;
                    }
                }
                ok
            }
            Filter::Not(part) => !self.filter_matches(part, entry)?,
            Filter::Present { attr } => entry.has_attr(attr),
            Filter::Equality { attr, value } => {
                let atype = self.schema.attr_type(attr);
                match atype.normalize(value) {
                    Ok(want) => self.any_value(entry, &atype, |norm| norm == want.as_slice()),
                    Err(_) => false,
                }
            }
            Filter::Ge { attr, value } => {
                let atype = self.schema.attr_type(attr);
                match atype.ordering_key(value) {
                    Ok(want) => {
                        let mut ok = false;
                        if let Some(a) = entry.attr(attr) {
                            for v in a.values.iter() {
                                if let Ok(key) = atype.ordering_key(v) {
                                    if key >= want {
                                        ok = true;
                                        break;
                                    }
                                }
                            }
                        }
                        ok
                    }
                    Err(_) => false,
                }
            }
            Filter::Le { attr, value } => {
                let atype = self.schema.attr_type(attr);
                match atype.ordering_key(value) {
                    Ok(want) => {
                        let mut ok = false;
                        if let Some(a) = entry.attr(attr) {
                            for v in a.values.iter() {
                                if let Ok(key) = atype.ordering_key(v) {
                                    if key <= want {
                                        ok = true;
                                        break;
                                    }
                                }
                            }
                        }
                        ok
                    }
                    Err(_) => false,
                }
            }
            Filter::Approx { attr, value } => {
                let atype = self.schema.attr_type(attr);
                match atype.approximate_key(value) {
                    Ok(want) => self.approx_value(entry, &atype, &want),
                    Err(_) => false,
                }
            }
            Filter::Substring { attr, initial, any, tail } => {
                let atype = self.schema.attr_type(attr);
                let mut ok = false;
                if let Some(a) = entry.attr(attr) {
                    for v in a.values.iter() {
                        if let Ok(norm) = atype.normalize(v) {
                            if substring_value_matches(&atype, &norm, initial, any, tail) {
                                ok = true;
                                break;
                            }
                        }
                    }
                }
                ok
            }
        };
        Ok(ok)
    }

    fn any_value<F>(&self, entry: &Entry, atype: &AttrType, pred: F) -> bool
    where
        F: Fn(&[u8]) -> bool,
    {
        match entry.attr(&atype.name) {
            Some(a) => a.values.iter().any(|v| match atype.normalize(v) {
                Ok(norm) => pred(&norm),
                Err(_) => false,
            }),
            None => false,
        }
    }

    fn approx_value(&self, entry: &Entry, atype: &AttrType, want: &[u8]) -> bool {
        match entry.attr(&atype.name) {
            Some(a) => a.values.iter().any(|v| match atype.approximate_key(v) {
                Ok(key) => key == want,
                Err(_) => false,
            }),
            None => false,
        }
    }
}

// normalized-value substring match, fragments in order, non-overlapping.
fn substring_value_matches(
    atype: &AttrType,
    norm: &[u8],
    initial: &Option<Vec<u8>>,
    any: &[Vec<u8>],
    tail: &Option<Vec<u8>>,
) -> bool {
    let mut off = 0_usize;

    if let Some(frag) = initial {
        let frag = match atype.normalize(frag) {
            Ok(frag) => frag,
            Err(_) => return false,
        };
        if !norm.starts_with(&frag) {
            return false;
        }
        off = frag.len();
    }

    for frag in any.iter() {
        let frag = match atype.normalize(frag) {
            Ok(frag) => frag,
            Err(_) => return false,
        };
        match find_sub(&norm[off..], &frag) {
            Some(at) => off = off + at + frag.len(),
            None => return false,
        }
    }

    if let Some(frag) = tail {
        let frag = match atype.normalize(frag) {
            Ok(frag) => frag,
            Err(_) => return false,
        };
        if norm.len() < off + frag.len() || !norm.ends_with(&frag) {
            return false;
        }
    }

    true
}

fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
#[path = "search_test.rs"]
mod search_test;
