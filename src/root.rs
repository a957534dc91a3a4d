//! Module `root` implement [RootContainer], the owner of the store
//! environment and the registry of per-base-DN containers.

use std::{
    collections::BTreeMap,
    ffi, path,
    sync::{
        atomic::{AtomicU64, Ordering::SeqCst},
        Arc,
    },
};

use crate::{
    config::BackendConfig,
    container::EntryContainer,
    dn::Dn,
    idset::EntryId,
    kvs::Environment,
    schema::Schema,
    Error, Result,
};

/// Monotonic entry-id source, shared by every container in the store.
///
/// Ids start at 1 and are never reused, deletes leave holes. The
/// high-water mark is recovered at open time from the largest key in
/// each `id2entry` namespace.
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new(next: u64) -> IdAllocator {
        IdAllocator {
            next: AtomicU64::new(next.max(1)),
        }
    }

    pub fn next_id(&self) -> Result<EntryId> {
        let id = self.next.fetch_add(1, SeqCst);
        if id == u64::MAX {
            // not recoverable, the store can no longer name new entries.
            return err_at!(Fatal, msg: "entry-id space exhausted");
        }
        Ok(EntryId(id))
    }

    /// Raise the high-water mark, never lowers it.
    pub fn advance_to(&self, floor: u64) {
        let mut cur = self.next.load(SeqCst);
        while cur < floor {
            match self.next.compare_exchange(cur, floor, SeqCst, SeqCst) {
                Ok(_) => break,
                Err(now) => cur = now,
            }
        }
    }

    pub fn to_next(&self) -> u64 {
        self.next.load(SeqCst)
    }
}

/// Top-level handle over one store directory.
pub struct RootContainer {
    dir: ffi::OsString,
    env: Arc<Environment>,
    alloc: Arc<IdAllocator>,
    schema: Arc<Schema>,
    containers: BTreeMap<String, Arc<EntryContainer>>, // by normalized base
}

impl RootContainer {
    /// Open the store at `config.dir` and a container per configured base
    /// DN, recovering the id allocator's high-water mark.
    pub fn open(config: &BackendConfig, schema: Arc<Schema>) -> Result<RootContainer> {
        let env = Arc::new(Environment::open(path::Path::new(&config.dir), config.durability)?);
        let alloc = Arc::new(IdAllocator::new(1));

        let mut root = RootContainer {
            dir: config.dir.clone(),
            env,
            alloc,
            schema,
            containers: BTreeMap::new(),
        };
        for base in config.bases.iter() {
            let base: Dn = base.parse()?;
            root.register(base, config)?;
        }

        log::info!(
            target: "root",
            "opened {:?}, {} containers, next entry-id {}",
            root.dir, root.containers.len(), root.alloc.to_next()
        );
        Ok(root)
    }

    /// Create and register the container for `base`. A base equal to, or
    /// nested under, a registered base is refused.
    pub fn register(&mut self, base: Dn, config: &BackendConfig) -> Result<Arc<EntryContainer>> {
        for other in self.containers.values() {
            let ob = other.to_base();
            if base.is_under(&ob) || ob.is_under(&base) {
                return err_at!(InvalidInput, msg: "base {} overlaps {}", base, ob);
            }
        }

        let container = EntryContainer::open(
            Arc::clone(&self.env),
            Arc::clone(&self.alloc),
            Arc::clone(&self.schema),
            base.clone(),
            &config.indexes,
            config.entry_limit,
        )?;
        if let Some(max) = container.max_entry_id()? {
            self.alloc.advance_to(max.0 + 1);
        }

        let container = Arc::new(container);
        self.containers.insert(base.as_norm().to_string(), Arc::clone(&container));
        Ok(container)
    }

    /// Drop `base`'s container and all its contents.
    pub fn deregister(&mut self, base: &Dn) -> Result<()> {
        match self.containers.remove(base.as_norm()) {
            Some(container) => container.clear(),
            None => err_at!(KeyNotFound, msg: "no container for {}", base),
        }
    }

    /// Container owning `dn`, the longest registered base that suffixes
    /// it. With non-overlapping bases at most one can match.
    pub fn container_for(&self, dn: &Dn) -> Option<Arc<EntryContainer>> {
        self.containers
            .values()
            .find(|c| dn.is_under(&c.to_base()))
            .map(Arc::clone)
    }

    /// Container registered exactly at `base`.
    pub fn container_at(&self, base: &Dn) -> Option<Arc<EntryContainer>> {
        self.containers.get(base.as_norm()).map(Arc::clone)
    }

    pub fn iter_containers(&self) -> impl Iterator<Item = &Arc<EntryContainer>> {
        self.containers.values()
    }

    /// Live entries across all containers.
    pub fn len(&self) -> Result<usize> {
        let mut total = 0;
        for container in self.containers.values() {
            total += container.len()?;
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn as_env(&self) -> &Arc<Environment> {
        &self.env
    }

    pub fn as_alloc(&self) -> &Arc<IdAllocator> {
        &self.alloc
    }

    pub fn as_schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Force a durable checkpoint of the whole store.
    pub fn checkpoint(&self) -> Result<()> {
        self.env.checkpoint()
    }

    /// Checkpoint and release the store directory.
    pub fn close(self) -> Result<()> {
        log::info!(target: "root", "closing {:?}", self.dir);
        self.env.checkpoint()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "root_test.rs"]
mod root_test;
