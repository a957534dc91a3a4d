//! Module `backend` implement [Backend], the single entry point over
//! the store.
//!
//! The backend routes each operation to the container owning its DN and
//! brackets it between explicit admission counters, one for readers and
//! one for writers. Maintenance that needs the store to itself, bulk
//! import and close, flips the quiesce flag, waits for both counters to
//! drain and then runs alone. Counters are adjusted explicitly on every
//! path, so the quiescence rule is visible at each call site.

use std::{
    io::{BufRead, Write},
    sync::atomic::{AtomicBool, AtomicU64, Ordering::SeqCst},
    thread,
    time::Duration,
};

use crate::{
    config::{BackendConfig, ImportConfig},
    container::{EntryContainer, SearchRequest, VerifyReport},
    dn::Dn,
    entry::{Entry, Modification},
    idset::EntryId,
    import::{self, ImportReport},
    indexer::IndexKind,
    ldif::LdifWriter,
    root::RootContainer,
    schema::{Schema, DEFAULT_SCHEMA},
    Error, Result,
};

use std::sync::Arc;

const DRAIN_PAUSE: Duration = Duration::from_millis(1);

/// Directory storage backend over one store directory.
pub struct Backend {
    root: RootContainer,
    readers: AtomicU64,
    writers: AtomicU64,
    quiescing: AtomicBool,
}

impl Backend {
    /// Open the backend with the built-in schema.
    pub fn open(config: BackendConfig) -> Result<Backend> {
        Backend::open_with_schema(config, Arc::clone(&DEFAULT_SCHEMA))
    }

    pub fn open_with_schema(config: BackendConfig, schema: Arc<Schema>) -> Result<Backend> {
        let root = RootContainer::open(&config, schema)?;
        Ok(Backend {
            root,
            readers: AtomicU64::new(0),
            writers: AtomicU64::new(0),
            quiescing: AtomicBool::new(false),
        })
    }

    // ---------------- admission ----------------

    fn begin_read(&self) -> Result<()> {
        if self.quiescing.load(SeqCst) {
            return err_at!(Unwilling, msg: "backend quiescing");
        }
        self.readers.fetch_add(1, SeqCst);
        if self.quiescing.load(SeqCst) {
            // lost the race with a quiesce, back out
            self.readers.fetch_sub(1, SeqCst);
            return err_at!(Unwilling, msg: "backend quiescing");
        }
        Ok(())
    }

    fn end_read(&self) {
        self.readers.fetch_sub(1, SeqCst);
    }

    fn begin_write(&self) -> Result<()> {
        if self.quiescing.load(SeqCst) {
            return err_at!(Unwilling, msg: "backend quiescing");
        }
        self.writers.fetch_add(1, SeqCst);
        if self.quiescing.load(SeqCst) {
            self.writers.fetch_sub(1, SeqCst);
            return err_at!(Unwilling, msg: "backend quiescing");
        }
        Ok(())
    }

    fn end_write(&self) {
        self.writers.fetch_sub(1, SeqCst);
    }

    // flip the quiesce flag and wait for in-flight operations to drain.
    fn quiesce(&self) -> Result<()> {
        if self.quiescing.swap(true, SeqCst) {
            return err_at!(Unwilling, msg: "backend already quiescing");
        }
        while self.readers.load(SeqCst) > 0 || self.writers.load(SeqCst) > 0 {
            thread::sleep(DRAIN_PAUSE);
        }
        Ok(())
    }

    fn resume(&self) {
        self.quiescing.store(false, SeqCst);
    }

    fn container_for(&self, dn: &Dn) -> Result<Arc<EntryContainer>> {
        match self.root.container_for(dn) {
            Some(container) => Ok(container),
            None => err_at!(Unwilling, msg: "{} under no configured base", dn),
        }
    }

    // ---------------- operations ----------------

    pub fn add(&self, entry: &Entry) -> Result<EntryId> {
        self.begin_write()?;
        let res = entry
            .to_dn()
            .and_then(|dn| self.container_for(&dn))
            .and_then(|container| container.add(entry));
        self.end_write();
        res
    }

    pub fn get(&self, dn: &Dn) -> Result<(EntryId, Entry)> {
        self.begin_read()?;
        let res = self.container_for(dn).and_then(|container| container.get(dn));
        self.end_read();
        res
    }

    /// Delete a leaf entry.
    pub fn delete(&self, dn: &Dn) -> Result<()> {
        self.begin_write()?;
        let res = self
            .container_for(dn)
            .and_then(|container| container.delete(dn, false /*subtree*/));
        self.end_write();
        res.map(|_| ())
    }

    /// Delete an entry and every descendant, return the number removed.
    pub fn delete_subtree(&self, dn: &Dn) -> Result<usize> {
        self.begin_write()?;
        let res = self
            .container_for(dn)
            .and_then(|container| container.delete(dn, true /*subtree*/));
        self.end_write();
        res
    }

    pub fn replace(&self, entry: &Entry) -> Result<()> {
        self.begin_write()?;
        let res = entry
            .to_dn()
            .and_then(|dn| self.container_for(&dn))
            .and_then(|container| container.replace(entry));
        self.end_write();
        res
    }

    pub fn modify(&self, dn: &Dn, mods: &[Modification]) -> Result<Entry> {
        self.begin_write()?;
        let res = self
            .container_for(dn)
            .and_then(|container| container.modify(dn, mods));
        self.end_write();
        res
    }

    /// Rename an entry within its container. A rename whose target falls
    /// under a different base is refused.
    pub fn rename(&self, dn: &Dn, new_entry: &Entry) -> Result<EntryId> {
        self.begin_write()?;
        let res = self.do_rename(dn, new_entry);
        self.end_write();
        res
    }

    fn do_rename(&self, dn: &Dn, new_entry: &Entry) -> Result<EntryId> {
        let source = self.container_for(dn)?;
        let new_dn = new_entry.to_dn()?;
        if !new_dn.is_under(&source.to_base()) {
            return err_at!(
                Unwilling, msg: "rename {} leaves base {}", dn, source.to_base()
            );
        }
        source.rename(dn, new_entry)
    }

    pub fn search(&self, req: &SearchRequest) -> Result<Vec<(EntryId, Entry)>> {
        self.begin_read()?;
        let res = self
            .container_for(&req.base)
            .and_then(|container| container.search(req));
        self.end_read();
        res
    }

    /// Live entries across all containers.
    pub fn len(&self) -> Result<usize> {
        self.begin_read()?;
        let res = self.root.len();
        self.end_read();
        res
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // ---------------- maintenance ----------------

    /// Bulk load LDIF. The store is quiesced for the duration, regular
    /// operations fail with `Unwilling` until the import finishes.
    pub fn import_ldif<R>(&self, config: &ImportConfig, source: R) -> Result<ImportReport>
    where
        R: BufRead,
    {
        self.quiesce()?;
        let res = import::import_ldif(&self.root, config, source);
        self.resume();
        res
    }

    /// Export every entry as LDIF, containers in base order, entries in
    /// id order. Return the number of entries written.
    pub fn export_ldif<W>(&self, sink: W) -> Result<usize>
    where
        W: Write,
    {
        self.begin_read()?;
        let res = self.do_export(sink);
        self.end_read();
        res
    }

    fn do_export<W: Write>(&self, sink: W) -> Result<usize> {
        let mut writer = LdifWriter::new(sink);
        for container in self.root.iter_containers() {
            for (_, entry) in container.iter_entries()?.into_iter() {
                writer.write_entry(&entry)?;
            }
        }
        writer.flush()?;
        Ok(writer.to_entries())
    }

    /// Export only the entries at and under `branch`.
    pub fn export_branch<W>(&self, branch: &Dn, sink: W) -> Result<usize>
    where
        W: Write,
    {
        self.begin_read()?;
        let res = self.do_export_branch(branch, sink);
        self.end_read();
        res
    }

    fn do_export_branch<W: Write>(&self, branch: &Dn, sink: W) -> Result<usize> {
        let container = self.container_for(branch)?;
        let mut writer = LdifWriter::new(sink);
        for (_, entry) in container.iter_entries()?.into_iter() {
            if entry.to_dn()?.is_under(branch) {
                writer.write_entry(&entry)?;
            }
        }
        writer.flush()?;
        Ok(writer.to_entries())
    }

    /// Cross-check primary mappings and indexes across all containers.
    pub fn verify(&self) -> Result<VerifyReport> {
        self.begin_read()?;
        let res = self.do_verify();
        self.end_read();
        res
    }

    fn do_verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        for container in self.root.iter_containers() {
            report.merge(&container.verify()?);
        }
        Ok(report)
    }

    /// Regenerate one attribute index under `base`.
    pub fn rebuild_index(&self, base: &Dn, attr: &str, kind: IndexKind) -> Result<usize> {
        self.begin_write()?;
        let res = match self.root.container_at(base) {
            Some(container) => container.rebuild_index(attr, kind),
            None => err_at!(KeyNotFound, msg: "no container at {}", base),
        };
        self.end_write();
        res
    }

    /// Force a durable checkpoint.
    pub fn checkpoint(&self) -> Result<()> {
        self.begin_write()?;
        let res = self.root.checkpoint();
        self.end_write();
        res
    }

    pub fn as_root(&self) -> &RootContainer {
        &self.root
    }

    /// Quiesce, checkpoint and release the store.
    pub fn close(self) -> Result<()> {
        self.quiesce()?;
        self.root.close()
    }
}

#[cfg(test)]
#[path = "backend_test.rs"]
mod backend_test;
