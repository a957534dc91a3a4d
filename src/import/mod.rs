//! Package `import` implement multi-threaded bulk load from LDIF.
//!
//! The pipeline has two roles. The calling thread reads records, assigns
//! entry-ids and writes the primary namespaces sequentially, which keeps
//! the parent-before-child ordering trivially correct. Index-key
//! extraction, the cpu-heavy part, fans out to worker threads over
//! bounded channels, each worker buffering postings and spilling sorted
//! runs. After the load phase every index merges its runs in one
//! key-ordered pass, so each index key is written exactly once.
//!
//! Bulk import bypasses per-entry transactions, the caller is expected
//! to hold off regular traffic for the duration, see
//! [crate::Backend::import_ldif].

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use std::{
    collections::BTreeMap,
    fmt,
    io::BufRead,
    path,
    result,
    sync::Arc,
};

use crate::{
    config::{ImportConfig, ImportMode},
    container::EntryContainer,
    dn::Dn,
    entry::Entry,
    idset::EntryId,
    index::Index,
    root::RootContainer,
    util::thread::{Rx, Thread, Tx},
    Result,
};

mod buffer;

pub use buffer::{merge_sources, KeyBuffer, RunSource};

const PROGRESS_EVERY: u64 = 10_000;

/// Outcome counters of one bulk import.
#[derive(Clone, Debug)]
pub struct ImportReport {
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    /// Records seen in the source, well formed or not.
    pub read: u64,
    /// Entries loaded into the store.
    pub imported: u64,
    /// Malformed records skipped.
    pub ignored: u64,
    /// Well-formed entries refused, duplicate DN, missing parent or no
    /// matching base.
    pub rejected: u64,
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        let secs = (self.finished - self.started).num_milliseconds() as f64 / 1000.0;
        write!(
            f,
            "read {}, imported {}, ignored {}, rejected {} in {:.3}s",
            self.read, self.imported, self.ignored, self.rejected, secs
        )
    }
}

// unit of work handed to an extraction worker.
struct Work {
    container: Arc<EntryContainer>,
    id: EntryId,
    entry: Entry,
}

type WorkerOut = Result<Vec<(String, KeyBuffer)>>;

/// Bulk load `source` into `root` per `config`.
pub fn import_ldif<R>(
    root: &RootContainer,
    config: &ImportConfig,
    source: R,
) -> Result<ImportReport>
where
    R: BufRead,
{
    let started = Utc::now();

    if config.mode == ImportMode::Replace {
        for container in root.iter_containers() {
            container.clear()?;
        }
    }

    let tmp_dir = match &config.tmp_dir {
        Some(dir) => path::PathBuf::from(dir),
        None => root.as_env().to_dir(),
    };
    let n_workers = config.threads.max(1);

    let mut workers: Vec<Thread<Work, (), WorkerOut>> = vec![];
    let mut txs: Vec<Tx<Work>> = vec![];
    for w in 0..n_workers {
        let (dir, budget) = (tmp_dir.clone(), config.buffer_bytes);
        let thread = Thread::new_sync(
            &format!("import-worker-{}", w),
            config.queue_size,
            move |rx| move || worker_loop(w, dir, budget, rx),
        );
        txs.push(thread.to_tx());
        workers.push(thread);
    }

    let mut report = ImportReport {
        started,
        finished: started,
        read: 0,
        imported: 0,
        ignored: 0,
        rejected: 0,
    };
    let mut contexts: BTreeMap<String, ImportContext> = BTreeMap::new();
    let mut rr = 0_usize;

    for item in crate::ldif::LdifReader::new(source) {
        report.read += 1;
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                report.ignored += 1;
                log::warn!(target: "import", "skipping record: {}", err);
                continue;
            }
        };
        let dn = match entry.to_dn() {
            Ok(dn) => dn,
            Err(err) => {
                report.ignored += 1;
                log::warn!(target: "import", "skipping record: {}", err);
                continue;
            }
        };

        let container = match root.container_for(&dn) {
            Some(container) => container,
            None => {
                report.rejected += 1;
                log::warn!(target: "import", "{} under no configured base", dn);
                continue;
            }
        };
        let context = contexts
            .entry(container.to_prefix())
            .or_insert_with(|| ImportContext::new(Arc::clone(&container)));

        match context.load_entry(&entry, &dn)? {
            Loaded::Entry(id) => {
                report.imported += 1;
                txs[rr % n_workers].post(Work {
                    container: Arc::clone(&container),
                    id,
                    entry,
                })?;
                rr += 1;
                if report.imported % PROGRESS_EVERY == 0 {
                    log::info!(target: "import", "loaded {} entries", report.imported);
                }
            }
            Loaded::Duplicate if config.mode == ImportMode::Overwrite => {
                // index deltas handled by the replace itself, nothing
                // goes to the extraction workers.
                container.replace(&entry)?;
                report.imported += 1;
            }
            Loaded::Duplicate => {
                report.rejected += 1;
                log::warn!(target: "import", "duplicate dn {}", dn);
            }
            Loaded::Orphan => {
                report.rejected += 1;
                log::warn!(target: "import", "missing parent for {}", dn);
            }
        }
    }

    // close the channels, workers treat the disconnect as end of input.
    std::mem::drop(txs);
    let mut by_tree: BTreeMap<String, Vec<KeyBuffer>> = BTreeMap::new();
    for worker in workers.into_iter() {
        for (tree, buf) in worker.join()?? {
            by_tree.entry(tree).or_insert_with(Vec::new).push(buf);
        }
    }

    // one key-ordered merge per index, indexes in parallel.
    let mut merges: Vec<(Index, Vec<KeyBuffer>)> = vec![];
    for container in root.iter_containers() {
        for index in container.as_indexes() {
            if let Some(bufs) = by_tree.remove(&index.tree) {
                merges.push((index.clone(), bufs));
            }
        }
    }
    let env = root.as_env();
    let counts = merges
        .into_par_iter()
        .map(|(index, bufs)| {
            let mut sources = vec![];
            for buf in bufs.into_iter() {
                sources.extend(buf.into_sources()?);
            }
            let n_keys = merge_sources(sources, |key, ids| index.load_merged(env, &key, ids))?;
            log::debug!(target: "import", "merged {} keys into {}", n_keys, index.tree);
            Ok(n_keys)
        })
        .collect::<Result<Vec<usize>>>()?;

    root.checkpoint()?;

    report.finished = Utc::now();
    log::info!(
        target: "import",
        "import done, {}, {} index keys", report, counts.iter().sum::<usize>()
    );
    Ok(report)
}

fn worker_loop(
    widx: usize,
    dir: path::PathBuf,
    budget: usize,
    rx: Rx<Work>,
) -> WorkerOut {
    let mut bufs: BTreeMap<String, KeyBuffer> = BTreeMap::new();

    for (work, _resp) in rx {
        for index in work.container.as_indexes() {
            let name = format!("{}-w{}", index.tree, widx);
            let buf = bufs
                .entry(index.tree.clone())
                .or_insert_with(|| KeyBuffer::new(&dir, &name, budget));
            for key in index.indexer.index_entry(&work.entry).into_iter() {
                buf.add(key, work.id.0)?;
            }
        }
    }

    Ok(bufs.into_iter().collect())
}

enum Loaded {
    Entry(EntryId),
    Duplicate,
    Orphan,
}

// per-container sequential-load state. The ancestor-chain cache makes
// the common case, children following their parent, a memory lookup.
struct ImportContext {
    container: Arc<EntryContainer>,
    // last loaded entry and its ancestors, nearest first.
    chain: Vec<(String, EntryId)>,
}

impl ImportContext {
    fn new(container: Arc<EntryContainer>) -> ImportContext {
        ImportContext {
            container,
            chain: vec![],
        }
    }

    fn load_entry(&mut self, entry: &Entry, dn: &Dn) -> Result<Loaded> {
        if self.container.bulk_get_id(dn)?.is_some() {
            return Ok(Loaded::Duplicate);
        }

        let base = self.container.to_base();
        let ancestors = match self.ancestor_ids(dn, &base)? {
            Some(ancestors) => ancestors,
            None => return Ok(Loaded::Orphan),
        };
        if ancestors.is_empty() && *dn != base {
            return Ok(Loaded::Orphan);
        }
        let parent_id = ancestors.first().map(|(_, id)| *id);

        let id = self.container.as_alloc().next_id()?;
        let ancestor_ids: Vec<EntryId> = ancestors.iter().map(|(_, id)| *id).collect();
        self.container.bulk_add(id, entry, parent_id, &ancestor_ids)?;

        let mut chain = vec![(dn.as_norm().to_string(), id)];
        chain.extend(ancestors);
        self.chain = chain;
        Ok(Loaded::Entry(id))
    }

    // resolve the ancestor ids of `dn`, nearest first, None when an
    // ancestor is not loaded yet.
    fn ancestor_ids(&self, dn: &Dn, base: &Dn) -> Result<Option<Vec<(String, EntryId)>>> {
        let mut out = vec![];
        for ancestor in dn.ancestors() {
            if !ancestor.is_under(base) {
                break;
            }
            let norm = ancestor.as_norm();
            if let Some(at) = self.chain.iter().position(|(n, _)| n == norm) {
                out.extend_from_slice(&self.chain[at..]);
                return Ok(Some(out));
            }
            match self.container.bulk_get_id(&ancestor)? {
                Some(id) => out.push((norm.to_string(), id)),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }
}
