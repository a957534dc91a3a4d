//! Package `container` implement [EntryContainer], the per-base-DN
//! aggregate owning the primary entry store and its secondary indexes.
//!
//! Five namespace families share one transactional scope:
//!
//! * `dn2id`, normalized DN to entry-id, the bijective primary mapping.
//! * `id2entry`, entry-id to serialized entry, the canonical store.
//! * `id2children`, parent id to immediate-child id-set.
//! * `id2subtree`, ancestor id to all-descendant id-set.
//! * one namespace per configured attribute index.
//!
//! Each operation runs as a single store transaction, a failure aborts
//! the transaction whole, no partial index update ever becomes visible.
//!
//! **Locking discipline**. Children/subtree and index maintenance are
//! multi-key read-modify-write sequences over shared records, and the
//! store applies write sets without write-write conflict detection. So
//! every update operation (add, delete, replace, rename) holds the
//! container latch exclusive, while get/search hold it shared.

use std::{collections::BTreeMap, ops::Bound, sync::Arc};

use crate::{
    config::IndexSpec,
    dn::Dn,
    entry::{Entry, Modification},
    idset::{EntryId, IdSet},
    index::Index,
    indexer::{IndexKind, Indexer},
    kvs::{Environment, Txn},
    root::IdAllocator,
    schema::Schema,
    util::{self, Spinlock},
    Error, Result,
};

mod search;

pub use search::{Filter, Scope, SearchRequest};

/// Per-base-DN entry container.
pub struct EntryContainer {
    base: Dn,
    prefix: String,
    dn2id: String,
    id2entry: String,
    id2children: String,
    id2subtree: String,
    indexes: Vec<Index>,

    env: Arc<Environment>,
    alloc: Arc<IdAllocator>,
    schema: Arc<Schema>,
    latch: Spinlock<u32>,
}

impl EntryContainer {
    /// Open the container for `base`, creating its namespaces as needed.
    pub fn open(
        env: Arc<Environment>,
        alloc: Arc<IdAllocator>,
        schema: Arc<Schema>,
        base: Dn,
        specs: &[IndexSpec],
        entry_limit: usize,
    ) -> Result<EntryContainer> {
        let prefix = base.to_namespace();
        let mut indexes = vec![];
        for spec in specs.iter() {
            let atype = schema.attr_type(&spec.attr);
            for kind in spec.to_kinds()?.into_iter() {
                let indexer = Indexer::new(kind, Arc::clone(&atype));
                let limit = spec.entry_limit.unwrap_or(entry_limit);
                indexes.push(Index::new(&prefix, indexer, limit));
            }
        }

        let container = EntryContainer {
            dn2id: format!("{}_dn2id", prefix),
            id2entry: format!("{}_id2entry", prefix),
            id2children: format!("{}_id2children", prefix),
            id2subtree: format!("{}_id2subtree", prefix),
            prefix,
            base,
            indexes,
            env,
            alloc,
            schema,
            latch: Spinlock::new(0),
        };
        container.create_trees()?;
        Ok(container)
    }

    fn create_trees(&self) -> Result<()> {
        self.env.create_tree(&self.dn2id)?;
        self.env.create_tree(&self.id2entry)?;
        self.env.create_tree(&self.id2children)?;
        self.env.create_tree(&self.id2subtree)?;
        for index in self.indexes.iter() {
            self.env.create_tree(&index.tree)?;
        }
        Ok(())
    }

    /// Remove all contents, used by deregistration and by fresh import.
    pub fn clear(&self) -> Result<()> {
        let _w = self.latch.write();
        self.env.drop_tree(&self.dn2id)?;
        self.env.drop_tree(&self.id2entry)?;
        self.env.drop_tree(&self.id2children)?;
        self.env.drop_tree(&self.id2subtree)?;
        for index in self.indexes.iter() {
            self.env.drop_tree(&index.tree)?;
        }
        self.create_trees()
    }

    pub fn to_base(&self) -> Dn {
        self.base.clone()
    }

    pub fn to_prefix(&self) -> String {
        self.prefix.clone()
    }

    pub fn as_indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub(crate) fn as_env(&self) -> &Environment {
        &self.env
    }

    pub(crate) fn as_alloc(&self) -> &IdAllocator {
        &self.alloc
    }

    /// Number of live entries.
    pub fn len(&self) -> Result<usize> {
        self.env.tree_len(&self.id2entry)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Largest assigned entry-id, scanned at open time to recover the
    /// allocator's high-water mark.
    pub fn max_entry_id(&self) -> Result<Option<EntryId>> {
        let items = self.env.range(&self.id2entry, Bound::Unbounded, Bound::Unbounded)?;
        match items.last() {
            Some((key, _)) => Ok(Some(EntryId::from_key(key)?)),
            None => Ok(None),
        }
    }

    // ------------ primary mapping helpers, within a transaction ------------

    fn txn_get_id(&self, txn: &Txn, dn: &Dn) -> Result<Option<EntryId>> {
        match txn.get(&self.dn2id, &dn.to_key())? {
            Some(data) => Ok(Some(EntryId::from_key(&data)?)),
            None => Ok(None),
        }
    }

    fn txn_get_entry(&self, txn: &Txn, id: EntryId) -> Result<Option<Entry>> {
        match txn.get(&self.id2entry, &id.to_key())? {
            Some(data) => Ok(Some(util::from_cbor_bytes::<Entry>(&data)?.0)),
            None => Ok(None),
        }
    }

    fn txn_read_set(&self, txn: &Txn, tree: &str, id: EntryId) -> Result<IdSet> {
        match txn.get(tree, &id.to_key())? {
            Some(data) => IdSet::from_bytes(&data),
            None => Ok(IdSet::new()),
        }
    }

    fn txn_write_set(&self, txn: &mut Txn, tree: &str, id: EntryId, set: IdSet) -> Result<()> {
        if set.is_empty() {
            txn.delete(tree, id.to_key());
        } else {
            txn.put(tree, id.to_key(), set.to_bytes()?);
        }
        Ok(())
    }

    // ids of every ancestor of `dn` down to the base entry, nearest first.
    fn txn_ancestor_ids(&self, txn: &Txn, dn: &Dn) -> Result<Vec<EntryId>> {
        let mut ids = vec![];
        for ancestor in dn.ancestors() {
            if !ancestor.is_under(&self.base) {
                break;
            }
            match self.txn_get_id(txn, &ancestor)? {
                Some(id) => ids.push(id),
                None => {
                    return err_at!(
                        Corruption, msg: "missing dn2id for ancestor {}", ancestor
                    );
                }
            }
        }
        Ok(ids)
    }

    // ------------------------ transactional CRUD ------------------------

    /// Add a new entry. Fails with `EntryExists` when the DN is taken and
    /// `ParentNotFound` when the immediate parent is absent.
    pub fn add(&self, entry: &Entry) -> Result<EntryId> {
        let dn = entry.to_dn()?;
        if !dn.is_under(&self.base) {
            return err_at!(Unwilling, msg: "{} not under {}", dn, self.base);
        }

        let _w = self.latch.write();
        let mut txn = self.env.txn();

        if self.txn_get_id(&txn, &dn)?.is_some() {
            return err_at!(EntryExists, msg: "{}", dn);
        }

        let parent_id = match dn.parent() {
            Some(parent) if parent.is_under(&self.base) => {
                match self.txn_get_id(&txn, &parent)? {
                    Some(id) => Some(id),
                    None => return err_at!(ParentNotFound, msg: "{}", parent),
                }
            }
            _ => {
                // base entry, or entry whose parent sits above the base
                if dn != self.base {
                    return err_at!(ParentNotFound, msg: "{}", dn);
                }
                None
            }
        };

        let id = self.alloc.next_id()?;
        txn.put(&self.dn2id, dn.to_key(), id.to_key());
        txn.put(&self.id2entry, id.to_key(), util::into_cbor_bytes(entry.clone())?);

        if let Some(pid) = parent_id {
            let mut children = self.txn_read_set(&txn, &self.id2children, pid)?;
            children.insert(id);
            self.txn_write_set(&mut txn, &self.id2children, pid, children)?;

            for aid in self.txn_ancestor_ids(&txn, &dn)?.into_iter() {
                let mut subtree = self.txn_read_set(&txn, &self.id2subtree, aid)?;
                subtree.insert(id);
                self.txn_write_set(&mut txn, &self.id2subtree, aid, subtree)?;
            }
        }

        for index in self.indexes.iter() {
            index.index_entry_insert(&mut txn, entry, id)?;
        }

        txn.commit()?;
        log::debug!(target: "container", "{} add {} id {:?}", self.prefix, dn, id);
        Ok(id)
    }

    /// Fetch an entry by DN. The returned entry is a private decoded
    /// copy, mutating it has no effect until written back via replace.
    pub fn get(&self, dn: &Dn) -> Result<(EntryId, Entry)> {
        let _r = self.latch.read();
        let txn = self.env.txn(); // read-only use of the overlay
        let id = match self.txn_get_id(&txn, dn)? {
            Some(id) => id,
            None => return err_at!(EntryNotFound, msg: "{}", dn),
        };
        match self.txn_get_entry(&txn, id)? {
            Some(entry) => Ok((id, entry)),
            None => err_at!(Corruption, msg: "dn2id without id2entry {}", dn),
        }
    }

    /// Fetch an entry by id.
    pub fn get_by_id(&self, id: EntryId) -> Result<Option<Entry>> {
        let _r = self.latch.read();
        match self.env.get(&self.id2entry, &id.to_key())? {
            Some(data) => Ok(Some(util::from_cbor_bytes::<Entry>(&data)?.0)),
            None => Ok(None),
        }
    }

    /// Delete an entry. A non-leaf fails with `NotLeaf` unless
    /// `subtree` is set, which removes all descendants deepest-first.
    /// Return the number of entries removed.
    pub fn delete(&self, dn: &Dn, subtree: bool) -> Result<usize> {
        let _w = self.latch.write();
        let mut txn = self.env.txn();

        let id = match self.txn_get_id(&txn, dn)? {
            Some(id) => id,
            None => return err_at!(EntryNotFound, msg: "{}", dn),
        };

        let children = self.txn_read_set(&txn, &self.id2children, id)?;
        if !children.is_empty() && !subtree {
            return err_at!(NotLeaf, msg: "{} has children", dn);
        }

        // deepest-first target list, self last.
        let mut targets: Vec<(Dn, EntryId)> = vec![];
        if subtree {
            let descendants = self.txn_read_set(&txn, &self.id2subtree, id)?;
            for did in descendants.iter() {
                let entry = match self.txn_get_entry(&txn, did)? {
                    Some(entry) => entry,
                    None => return err_at!(Corruption, msg: "subtree id {:?} unbacked", did),
                };
                targets.push((entry.to_dn()?, did));
            }
            targets.sort_by(|a, b| b.0.num_rdns().cmp(&a.0.num_rdns()));
        }
        targets.push((dn.clone(), id));

        let n = targets.len();
        for (dn, id) in targets.into_iter() {
            self.txn_delete_one(&mut txn, &dn, id)?;
        }

        txn.commit()?;
        log::debug!(target: "container", "{} delete {}, {} removed", self.prefix, dn, n);
        Ok(n)
    }

    fn txn_delete_one(&self, txn: &mut Txn, dn: &Dn, id: EntryId) -> Result<()> {
        let entry = match self.txn_get_entry(txn, id)? {
            Some(entry) => entry,
            None => return err_at!(Corruption, msg: "dn2id without id2entry {}", dn),
        };

        txn.delete(&self.dn2id, dn.to_key());
        txn.delete(&self.id2entry, id.to_key());
        txn.delete(&self.id2children, id.to_key());
        txn.delete(&self.id2subtree, id.to_key());

        if let Some(parent) = dn.parent() {
            if parent.is_under(&self.base) {
                if let Some(pid) = self.txn_get_id(txn, &parent)? {
                    let mut children = self.txn_read_set(txn, &self.id2children, pid)?;
                    children.remove(id);
                    self.txn_write_set(txn, &self.id2children, pid, children)?;
                }
                for ancestor in dn.ancestors() {
                    if !ancestor.is_under(&self.base) {
                        break;
                    }
                    if let Some(aid) = self.txn_get_id(txn, &ancestor)? {
                        let mut subtree = self.txn_read_set(txn, &self.id2subtree, aid)?;
                        subtree.remove(id);
                        self.txn_write_set(txn, &self.id2subtree, aid, subtree)?;
                    }
                }
            }
        }

        for index in self.indexes.iter() {
            index.index_entry_remove(txn, &entry, id)?;
        }
        Ok(())
    }

    /// Replace an entry's content wholesale. Index maintenance diffs the
    /// old/new pair, a value surviving the replace causes no index churn.
    pub fn replace(&self, entry: &Entry) -> Result<()> {
        let dn = entry.to_dn()?;

        // two replaces can hit the same index key, the id-set
        // read-modify-write needs the exclusive latch.
        let _w = self.latch.write();
        let mut txn = self.env.txn();

        let id = match self.txn_get_id(&txn, &dn)? {
            Some(id) => id,
            None => return err_at!(EntryNotFound, msg: "{}", dn),
        };
        let old = match self.txn_get_entry(&txn, id)? {
            Some(old) => old,
            None => return err_at!(Corruption, msg: "dn2id without id2entry {}", dn),
        };

        for index in self.indexes.iter() {
            index.apply_diff(&mut txn, &old, entry, id)?;
        }
        txn.put(&self.id2entry, id.to_key(), util::into_cbor_bytes(entry.clone())?);

        txn.commit()?;
        log::debug!(target: "container", "{} replace {}", self.prefix, dn);
        Ok(())
    }

    /// Apply a modification list to the entry at `dn` and return the new
    /// rendition.
    pub fn modify(&self, dn: &Dn, mods: &[Modification]) -> Result<Entry> {
        let (_, old) = self.get(dn)?;
        let new = old.apply_mods(mods)?;
        self.replace(&new)?;
        Ok(new)
    }

    /// Rename an entry to `new_entry`'s DN, keeping its id. Confined to
    /// this container, and to leaf entries, a subtree rename is refused.
    pub fn rename(&self, dn: &Dn, new_entry: &Entry) -> Result<EntryId> {
        let new_dn = new_entry.to_dn()?;
        if !new_dn.is_under(&self.base) {
            return err_at!(Unwilling, msg: "target {} not under {}", new_dn, self.base);
        }

        let _w = self.latch.write();
        let mut txn = self.env.txn();

        let id = match self.txn_get_id(&txn, dn)? {
            Some(id) => id,
            None => return err_at!(EntryNotFound, msg: "{}", dn),
        };
        if *dn == new_dn {
            return err_at!(Unwilling, msg: "rename to self {}", dn);
        }
        if self.txn_get_id(&txn, &new_dn)?.is_some() {
            return err_at!(EntryExists, msg: "{}", new_dn);
        }
        let children = self.txn_read_set(&txn, &self.id2children, id)?;
        if !children.is_empty() {
            return err_at!(NotLeaf, msg: "rename of non-leaf {}", dn);
        }
        let old = match self.txn_get_entry(&txn, id)? {
            Some(old) => old,
            None => return err_at!(Corruption, msg: "dn2id without id2entry {}", dn),
        };

        let new_parent = match new_dn.parent() {
            Some(parent) if parent.is_under(&self.base) => parent,
            _ => return err_at!(Unwilling, msg: "cannot rename base entry {}", dn),
        };
        let new_pid = match self.txn_get_id(&txn, &new_parent)? {
            Some(pid) => pid,
            None => return err_at!(ParentNotFound, msg: "{}", new_parent),
        };

        // relocate the primary mapping, same id.
        txn.delete(&self.dn2id, dn.to_key());
        txn.put(&self.dn2id, new_dn.to_key(), id.to_key());

        // detach from the old ancestor chain.
        if let Some(parent) = dn.parent() {
            if parent.is_under(&self.base) {
                if let Some(pid) = self.txn_get_id(&txn, &parent)? {
                    let mut set = self.txn_read_set(&txn, &self.id2children, pid)?;
                    set.remove(id);
                    self.txn_write_set(&mut txn, &self.id2children, pid, set)?;
                }
            }
            for ancestor in dn.ancestors() {
                if !ancestor.is_under(&self.base) {
                    break;
                }
                if let Some(aid) = self.txn_get_id(&txn, &ancestor)? {
                    let mut set = self.txn_read_set(&txn, &self.id2subtree, aid)?;
                    set.remove(id);
                    self.txn_write_set(&mut txn, &self.id2subtree, aid, set)?;
                }
            }
        }

        // attach to the new ancestor chain.
        {
            let mut set = self.txn_read_set(&txn, &self.id2children, new_pid)?;
            set.insert(id);
            self.txn_write_set(&mut txn, &self.id2children, new_pid, set)?;
        }
        for aid in self.txn_ancestor_ids(&txn, &new_dn)?.into_iter() {
            let mut set = self.txn_read_set(&txn, &self.id2subtree, aid)?;
            set.insert(id);
            self.txn_write_set(&mut txn, &self.id2subtree, aid, set)?;
        }

        // index deltas cover RDN attribute-value changes.
        for index in self.indexes.iter() {
            index.apply_diff(&mut txn, &old, new_entry, id)?;
        }
        txn.put(&self.id2entry, id.to_key(), util::into_cbor_bytes(new_entry.clone())?);

        txn.commit()?;
        log::debug!(target: "container", "{} rename {} to {}", self.prefix, dn, new_dn);
        Ok(id)
    }

    // ------------------------ read-side helpers ------------------------

    /// Immediate children id-set of `dn`'s entry.
    pub fn children_of(&self, dn: &Dn) -> Result<IdSet> {
        let _r = self.latch.read();
        let txn = self.env.txn();
        match self.txn_get_id(&txn, dn)? {
            Some(id) => self.txn_read_set(&txn, &self.id2children, id),
            None => err_at!(EntryNotFound, msg: "{}", dn),
        }
    }

    /// All-descendant id-set of `dn`'s entry.
    pub fn subtree_of(&self, dn: &Dn) -> Result<IdSet> {
        let _r = self.latch.read();
        let txn = self.env.txn();
        match self.txn_get_id(&txn, dn)? {
            Some(id) => self.txn_read_set(&txn, &self.id2subtree, id),
            None => err_at!(EntryNotFound, msg: "{}", dn),
        }
    }

    /// Snapshot of all live entries in id order, the export path.
    pub fn iter_entries(&self) -> Result<Vec<(EntryId, Entry)>> {
        let _r = self.latch.read();
        let items = self.env.range(&self.id2entry, Bound::Unbounded, Bound::Unbounded)?;
        let mut out = Vec::with_capacity(items.len());
        for (key, data) in items.into_iter() {
            let id = EntryId::from_key(&key)?;
            out.push((id, util::from_cbor_bytes::<Entry>(&data)?.0));
        }
        Ok(out)
    }

    // ------------------------ bulk-load path ------------------------
    //
    // Direct namespace writes for import, no transaction. The import
    // pipeline is the sole writer while these run.

    pub(crate) fn bulk_get_id(&self, dn: &Dn) -> Result<Option<EntryId>> {
        match self.env.get(&self.dn2id, &dn.to_key())? {
            Some(data) => Ok(Some(EntryId::from_key(&data)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn bulk_add(
        &self,
        id: EntryId,
        entry: &Entry,
        parent_id: Option<EntryId>,
        ancestor_ids: &[EntryId],
    ) -> Result<()> {
        let dn = entry.to_dn()?;
        let _w = self.latch.write();

        self.env.put(&self.dn2id, dn.to_key(), id.to_key())?;
        self.env
            .put(&self.id2entry, id.to_key(), util::into_cbor_bytes(entry.clone())?)?;

        if let Some(pid) = parent_id {
            let mut children = match self.env.get(&self.id2children, &pid.to_key())? {
                Some(data) => IdSet::from_bytes(&data)?,
                None => IdSet::new(),
            };
            children.insert(id);
            self.env
                .put(&self.id2children, pid.to_key(), children.to_bytes()?)?;
        }
        for aid in ancestor_ids.iter() {
            let mut subtree = match self.env.get(&self.id2subtree, &aid.to_key())? {
                Some(data) => IdSet::from_bytes(&data)?,
                None => IdSet::new(),
            };
            subtree.insert(id);
            self.env
                .put(&self.id2subtree, aid.to_key(), subtree.to_bytes()?)?;
        }
        Ok(())
    }

    // ------------------------ maintenance ------------------------

    /// Regenerate one attribute index from `id2entry`, clearing it first.
    /// This is the recovery path for limit-exceeded keys.
    pub fn rebuild_index(&self, attr: &str, kind: IndexKind) -> Result<usize> {
        let attr = attr.to_lowercase();
        let index = match self
            .indexes
            .iter()
            .find(|ix| ix.indexer.atype.name == attr && ix.indexer.kind == kind)
        {
            Some(index) => index.clone(),
            None => return err_at!(KeyNotFound, msg: "no index {}.{}", attr, kind),
        };

        let _w = self.latch.write();
        self.env.drop_tree(&index.tree)?;
        self.env.create_tree(&index.tree)?;

        let mut n = 0;
        let entries = self.iter_entries_nolatch()?;
        let mut txn = self.env.txn();
        for (id, entry) in entries.into_iter() {
            index.index_entry_insert(&mut txn, &entry, id)?;
            n += 1;
        }
        txn.commit()?;
        log::info!(target: "container", "{} rebuilt {}, {} entries", self.prefix, index.tree, n);
        Ok(n)
    }

    fn iter_entries_nolatch(&self) -> Result<Vec<(EntryId, Entry)>> {
        let items = self.env.range(&self.id2entry, Bound::Unbounded, Bound::Unbounded)?;
        let mut out = Vec::with_capacity(items.len());
        for (key, data) in items.into_iter() {
            let id = EntryId::from_key(&key)?;
            out.push((id, util::from_cbor_bytes::<Entry>(&data)?.0));
        }
        Ok(out)
    }

    /// Read-only cross-check of the primary mappings and every secondary
    /// index. Mismatches are logged and counted, never repaired here,
    /// rebuild is the explicit repair path.
    pub fn verify(&self) -> Result<VerifyReport> {
        let _r = self.latch.read();
        let mut report = VerifyReport::default();

        let dn_items = self.env.range(&self.dn2id, Bound::Unbounded, Bound::Unbounded)?;
        let id_items = self.env.range(&self.id2entry, Bound::Unbounded, Bound::Unbounded)?;

        let mut by_id: BTreeMap<EntryId, Entry> = BTreeMap::new();
        for (key, data) in id_items.into_iter() {
            by_id.insert(EntryId::from_key(&key)?, util::from_cbor_bytes::<Entry>(&data)?.0);
        }

        for (key, data) in dn_items.into_iter() {
            report.checked += 1;
            let id = EntryId::from_key(&data)?;
            match by_id.get(&id) {
                Some(entry) => {
                    let dn = entry.to_dn()?;
                    if dn.to_key() != key {
                        report.errors += 1;
                        log::warn!(target: "verify", "{} dn2id {:?} points to {}", self.prefix, key, dn);
                    }
                }
                None => {
                    report.errors += 1;
                    log::warn!(target: "verify", "{} dn2id {:?} without id2entry", self.prefix, key);
                }
            }
        }

        if by_id.len() != report.checked as usize {
            report.errors += (by_id.len() as u64).abs_diff(report.checked);
            log::warn!(
                target: "verify",
                "{} id2entry holds {} records, dn2id {}", self.prefix, by_id.len(), report.checked
            );
        }

        for (id, entry) in by_id.iter() {
            for index in self.indexes.iter() {
                for key in index.indexer.index_entry(entry).iter() {
                    if !index.read_key(&self.env, key)?.contains(*id) {
                        report.errors += 1;
                        log::warn!(
                            target: "verify",
                            "{} index {} missing id {:?} under key {:?}",
                            self.prefix, index.tree, id, key
                        );
                    }
                }
            }
        }

        Ok(report)
    }
}

/// Outcome of a verify run, diagnostics only.
#[derive(Clone, Debug, Default)]
pub struct VerifyReport {
    /// Number of primary records checked.
    pub checked: u64,
    /// Number of mismatches found.
    pub errors: u64,
}

impl VerifyReport {
    pub fn merge(&mut self, other: &VerifyReport) {
        self.checked += other.checked;
        self.errors += other.errors;
    }
}
