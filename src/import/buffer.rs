//! Module `buffer` implement the buffered external merge used by bulk
//! import.
//!
//! Worker threads accumulate `key -> [entry-id]` postings in memory and
//! spill a sorted run file whenever the buffer budget is crossed. After
//! the load phase, each index's runs, one or more per worker, are merged
//! key-ordered into the index namespace in a single sequential pass.

use cbordata::Cborize;

use std::{
    cmp,
    collections::{BTreeMap, BinaryHeap},
    fs,
    io::{Read, Write},
    path,
};

use crate::{util, Error, Result};

const RUN_VER: u32 = 0x00010001;

// one posting in a run file, ids unsorted, the merge sink sorts.
#[derive(Clone, Debug, Cborize)]
struct RunRec {
    key: Vec<u8>,
    ids: Vec<u64>,
}

impl RunRec {
    const ID: u32 = RUN_VER;
}

/// Spilling posting buffer for one index, owned by one worker thread.
pub struct KeyBuffer {
    name: String, // unique across workers, names the run files
    dir: path::PathBuf,
    budget: usize,

    map: BTreeMap<Vec<u8>, Vec<u64>>,
    bytes: usize,
    runs: Vec<path::PathBuf>,
}

impl KeyBuffer {
    pub fn new(dir: &path::Path, name: &str, budget: usize) -> KeyBuffer {
        KeyBuffer {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            budget,
            map: BTreeMap::new(),
            bytes: 0,
            runs: vec![],
        }
    }

    /// Add one posting, spilling a run when past budget.
    pub fn add(&mut self, key: Vec<u8>, id: u64) -> Result<()> {
        self.bytes += key.len() + 8;
        self.map.entry(key).or_insert_with(Vec::new).push(id);
        if self.bytes >= self.budget {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.map.is_empty() {
            return Ok(());
        }

        let loc = self.dir.join(format!("{}-{}.run", self.name, self.runs.len()));
        let mut fd = err_at!(IOError, fs::File::create(&loc), "run file {:?}", loc)?;

        let map = std::mem::take(&mut self.map);
        let mut n = 0_usize;
        for (key, ids) in map.into_iter() {
            let data = util::into_cbor_bytes(RunRec { key, ids })?;
            err_at!(IOError, fd.write_all(&(data.len() as u32).to_le_bytes()))?;
            err_at!(IOError, fd.write_all(&data))?;
            n += 1;
        }
        err_at!(IOError, fd.sync_all())?;

        log::debug!(
            target: "import",
            "spilled {:?}, {} keys, {} bytes buffered", loc, n, self.bytes
        );
        self.bytes = 0;
        self.runs.push(loc);
        Ok(())
    }

    /// Close out the buffer into its merge sources, spilled runs plus the
    /// still-buffered postings.
    pub fn into_sources(mut self) -> Result<Vec<RunSource>> {
        let mut sources = vec![];
        // runs not yet converted stay owned by the buffer, whose drop
        // reclaims them should a conversion fail.
        while let Some(loc) = self.runs.pop() {
            let source = match RunSource::from_file(loc.clone()) {
                Ok(source) => source,
                Err(err) => {
                    fs::remove_file(&loc).ok();
                    return Err(err);
                }
            };
            sources.push(source);
        }
        if !self.map.is_empty() {
            sources.push(RunSource::from_map(std::mem::take(&mut self.map)));
        }
        Ok(sources)
    }
}

// run files not yet handed to a RunSource are scratch state, reclaim
// them whatever path drops the buffer.
impl Drop for KeyBuffer {
    fn drop(&mut self) {
        for loc in self.runs.drain(..) {
            fs::remove_file(&loc).ok();
        }
    }
}

/// One key-ordered posting stream feeding the merge.
pub enum RunSource {
    File {
        loc: path::PathBuf,
        fd: fs::File,
    },
    Mem {
        iter: std::collections::btree_map::IntoIter<Vec<u8>, Vec<u64>>,
    },
}

impl RunSource {
    fn from_file(loc: path::PathBuf) -> Result<RunSource> {
        let fd = err_at!(IOError, fs::File::open(&loc), "run file {:?}", loc)?;
        Ok(RunSource::File { loc, fd })
    }

    fn from_map(map: BTreeMap<Vec<u8>, Vec<u64>>) -> RunSource {
        RunSource::Mem {
            iter: map.into_iter(),
        }
    }

    // next posting in key order, None at end of stream.
    fn next_rec(&mut self) -> Result<Option<(Vec<u8>, Vec<u64>)>> {
        match self {
            RunSource::Mem { iter } => Ok(iter.next()),
            RunSource::File { loc, fd } => {
                let mut lenbuf = [0_u8; 4];
                match fd.read_exact(&mut lenbuf) {
                    Ok(()) => (),
                    Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                        return Ok(None);
                    }
                    Err(err) => return err_at!(IOError, Err(err), "run file {:?}", loc),
                }
                let len = u32::from_le_bytes(lenbuf) as usize;
                let mut data = vec![0_u8; len];
                err_at!(IOError, fd.read_exact(&mut data), "run file {:?}", loc)?;
                let (rec, _) = util::from_cbor_bytes::<RunRec>(&data)?;
                Ok(Some((rec.key, rec.ids)))
            }
        }
    }
}

// the scratch file is reclaimed when its source drops, at merge end or
// on the merge's error path alike.
impl Drop for RunSource {
    fn drop(&mut self) {
        if let RunSource::File { loc, .. } = self {
            fs::remove_file(&loc).ok();
        }
    }
}

// heap item, min-key first.
struct HeapItem {
    key: Vec<u8>,
    ids: Vec<u64>,
    source: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &HeapItem) -> bool {
        self.key == other.key
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &HeapItem) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &HeapItem) -> cmp::Ordering {
        other.key.cmp(&self.key) // reversed, BinaryHeap is a max-heap
    }
}

/// K-way merge over `sources`, invoking `sink` once per distinct key with
/// the sorted, deduplicated union of its postings.
pub fn merge_sources<F>(sources: Vec<RunSource>, mut sink: F) -> Result<usize>
where
    F: FnMut(Vec<u8>, Vec<u64>) -> Result<()>,
{
    let mut sources = sources;
    let mut heap = BinaryHeap::new();
    for (i, source) in sources.iter_mut().enumerate() {
        if let Some((key, ids)) = source.next_rec()? {
            heap.push(HeapItem { key, ids, source: i });
        }
    }

    let mut n_keys = 0_usize;
    while let Some(head) = heap.pop() {
        let HeapItem { key, mut ids, source } = head;
        if let Some((k, i)) = sources[source].next_rec()? {
            heap.push(HeapItem { key: k, ids: i, source });
        }

        // drain every source holding the same key
        while let Some(peek) = heap.peek() {
            if peek.key != key {
                break;
            }
            let item = match heap.pop() {
                Some(item) => item,
                None => break,
            };
            ids.extend_from_slice(&item.ids);
            if let Some((k, i)) = sources[item.source].next_rec()? {
                heap.push(HeapItem { key: k, ids: i, source: item.source });
            }
        }

        ids.sort_unstable();
        ids.dedup();
        sink(key, ids)?;
        n_keys += 1;
    }
    Ok(n_keys)
}

#[cfg(test)]
#[path = "buffer_test.rs"]
mod buffer_test;
