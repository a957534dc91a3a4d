//! Module `env` implement the default key-value environment.

use fs2::FileExt;
use serde::Deserialize;

use cbordata::Cborize;

use std::{
    collections::BTreeMap,
    fs, io,
    io::{Read, Write},
    ops::Bound,
    path,
};

use crate::{
    util::{self, Spinlock},
    Error, Result,
};

const CHECKPOINT_VER: u32 = 0x00010001;
const CHECKPOINT_FILE: &str = "dirstore.ckpt";
const LOCK_FILE: &str = "dirstore.lock";

const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Durability knob for commit, trading latency for durability.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Durability {
    /// Checkpoint after every committed transaction.
    FullSync,
    /// Checkpoint only on close and on explicit checkpoint calls.
    Deferred,
}

impl Default for Durability {
    fn default() -> Durability {
        Durability::Deferred
    }
}

type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Clone, Cborize)]
struct KvRec {
    key: Vec<u8>,
    val: Vec<u8>,
}

impl KvRec {
    const ID: u32 = CHECKPOINT_VER;
}

#[derive(Clone, Cborize)]
struct TreeRec {
    name: String,
    items: Vec<KvRec>,
}

impl TreeRec {
    const ID: u32 = CHECKPOINT_VER;
}

#[derive(Clone, Cborize)]
struct CheckpointRec {
    version: u32,
    trees: Vec<TreeRec>,
}

impl CheckpointRec {
    const ID: u32 = CHECKPOINT_VER;
}

/// The shared key-value environment handle.
///
/// Concurrent readers take the latch shared, transactions apply their
/// write set under the exclusive latch at commit, so a reader never
/// observes a half-applied transaction.
pub struct Environment {
    dir: path::PathBuf,
    durability: Durability,
    _lock_file: fs::File, // advisory lock held while the environment is open
    trees: Spinlock<BTreeMap<String, Tree>>,
}

impl Environment {
    /// Open an environment under `dir`, creating the directory as needed
    /// and recovering the previous checkpoint when one exists. A second
    /// open on the same directory fails while this handle is live.
    pub fn open(dir: &path::Path, durability: Durability) -> Result<Environment> {
        err_at!(IOError, fs::create_dir_all(dir), "env dir {:?}", dir)?;

        let lock_loc = dir.join(LOCK_FILE);
        let lock_file = err_at!(
            IOError,
            fs::OpenOptions::new().create(true).write(true).open(&lock_loc)
        )?;
        err_at!(Fatal, lock_file.try_lock_exclusive(), "environment already open {:?}", dir)?;

        let trees = match Self::load_checkpoint(dir)? {
            Some(trees) => trees,
            None => BTreeMap::new(),
        };

        log::info!(
            target: "kvs",
            "environment open {:?}, {} namespaces, durability {:?}",
            dir,
            trees.len(),
            durability
        );

        Ok(Environment {
            dir: dir.to_path_buf(),
            durability,
            _lock_file: lock_file,
            trees: Spinlock::new(trees),
        })
    }

    /// The environment's directory.
    pub fn to_dir(&self) -> path::PathBuf {
        self.dir.clone()
    }

    /// Create a namespace. Opening an existing namespace is a no-op.
    pub fn create_tree(&self, name: &str) -> Result<()> {
        let mut guard = self.trees.write();
        guard.entry(name.to_string()).or_insert_with(BTreeMap::new);
        Ok(())
    }

    /// Remove a namespace and all its contents.
    pub fn drop_tree(&self, name: &str) -> Result<()> {
        let mut guard = self.trees.write();
        guard.remove(name);
        Ok(())
    }

    pub fn has_tree(&self, name: &str) -> bool {
        self.trees.read().contains_key(name)
    }

    pub fn list_trees(&self) -> Vec<String> {
        self.trees.read().keys().cloned().collect()
    }

    /// Committed-state point read, outside any transaction.
    pub fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let guard = self.trees.read();
        match guard.get(tree) {
            Some(t) => Ok(t.get(key).cloned()),
            None => err_at!(StoreFail, msg: "no such namespace {}", tree),
        }
    }

    /// Direct put, outside any transaction. Used by the bulk-load path.
    pub fn put(&self, tree: &str, key: Vec<u8>, val: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let mut guard = self.trees.write();
        match guard.get_mut(tree) {
            Some(t) => Ok(t.insert(key, val)),
            None => err_at!(StoreFail, msg: "no such namespace {}", tree),
        }
    }

    /// Direct delete, outside any transaction.
    pub fn delete(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut guard = self.trees.write();
        match guard.get_mut(tree) {
            Some(t) => Ok(t.remove(key)),
            None => err_at!(StoreFail, msg: "no such namespace {}", tree),
        }
    }

    /// Ordered range scan, returns a point-in-time snapshot of the
    /// committed state.
    pub fn range(
        &self,
        tree: &str,
        lo: Bound<Vec<u8>>,
        hi: Bound<Vec<u8>>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let guard = self.trees.read();
        match guard.get(tree) {
            Some(t) => Ok(t
                .range((lo, hi))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()),
            None => err_at!(StoreFail, msg: "no such namespace {}", tree),
        }
    }

    /// Number of records in a namespace.
    pub fn tree_len(&self, tree: &str) -> Result<usize> {
        let guard = self.trees.read();
        match guard.get(tree) {
            Some(t) => Ok(t.len()),
            None => err_at!(StoreFail, msg: "no such namespace {}", tree),
        }
    }

    /// Begin a transaction. Reads see committed state overlaid with the
    /// transaction's own writes, commit applies the write set atomically.
    pub fn txn(&self) -> Txn {
        Txn {
            env: self,
            writes: BTreeMap::new(),
        }
    }

    /// Write a durable checkpoint of the committed state. The file is
    /// written aside and renamed into place, a torn write leaves the
    /// previous checkpoint intact.
    pub fn checkpoint(&self) -> Result<()> {
        let rec = {
            let guard = self.trees.read();
            CheckpointRec {
                version: CHECKPOINT_VER,
                trees: guard
                    .iter()
                    .map(|(name, t)| TreeRec {
                        name: name.clone(),
                        items: t
                            .iter()
                            .map(|(k, v)| KvRec {
                                key: k.clone(),
                                val: v.clone(),
                            })
                            .collect(),
                    })
                    .collect(),
            }
        };

        let payload = util::into_cbor_bytes(rec)?;
        let crc = CRC32.checksum(&payload);

        let tmp_loc = self.dir.join(format!("{}.tmp", CHECKPOINT_FILE));
        let mut fd = err_at!(IOError, fs::File::create(&tmp_loc))?;
        err_at!(IOError, fd.write_all(&payload))?;
        err_at!(IOError, fd.write_all(&crc.to_le_bytes()))?;
        err_at!(IOError, fd.sync_all())?;
        err_at!(
            IOError,
            fs::rename(&tmp_loc, self.dir.join(CHECKPOINT_FILE))
        )?;

        log::debug!(target: "kvs", "checkpoint {:?}, {} bytes", self.dir, payload.len());
        Ok(())
    }

    /// Checkpoint and release the environment.
    pub fn close(self) -> Result<()> {
        self.checkpoint()
        // lock file unlocks when the handle drops
    }

    fn load_checkpoint(dir: &path::Path) -> Result<Option<BTreeMap<String, Tree>>> {
        let loc = dir.join(CHECKPOINT_FILE);
        let mut fd = match fs::File::open(&loc) {
            Ok(fd) => fd,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return err_at!(IOError, Err(err), "open {:?}", loc),
        };

        let mut data = vec![];
        err_at!(IOError, fd.read_to_end(&mut data))?;
        if data.len() < 4 {
            return err_at!(Corruption, msg: "checkpoint too short {:?}", loc);
        }
        let (payload, trailer) = data.split_at(data.len() - 4);
        let mut buf = [0_u8; 4];
        buf.copy_from_slice(trailer);
        if CRC32.checksum(payload) != u32::from_le_bytes(buf) {
            return err_at!(Corruption, msg: "checkpoint crc mismatch {:?}", loc);
        }

        let (rec, _) = util::from_cbor_bytes::<CheckpointRec>(payload)?;
        if rec.version != CHECKPOINT_VER {
            return err_at!(Corruption, msg: "checkpoint version {:x}", rec.version);
        }

        let mut trees = BTreeMap::new();
        for tr in rec.trees.into_iter() {
            let tree: Tree = tr.items.into_iter().map(|kv| (kv.key, kv.val)).collect();
            trees.insert(tr.name, tree);
        }
        Ok(Some(trees))
    }
}

enum Op {
    Put(Vec<u8>),
    Delete,
}

/// A write transaction over the environment.
///
/// Writes are buffered in the transaction and applied under the
/// environment's exclusive latch at commit. Dropping the transaction
/// without commit aborts it, nothing of the write set becomes visible.
pub struct Txn<'a> {
    env: &'a Environment,
    writes: BTreeMap<(String, Vec<u8>), Op>,
}

impl<'a> Txn<'a> {
    /// Read through the transaction, own writes first, then committed
    /// state.
    pub fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.writes.get(&(tree.to_string(), key.to_vec())) {
            Some(Op::Put(val)) => Ok(Some(val.clone())),
            Some(Op::Delete) => Ok(None),
            None => self.env.get(tree, key),
        }
    }

    pub fn put(&mut self, tree: &str, key: Vec<u8>, val: Vec<u8>) {
        self.writes.insert((tree.to_string(), key), Op::Put(val));
    }

    pub fn delete(&mut self, tree: &str, key: Vec<u8>) {
        self.writes.insert((tree.to_string(), key), Op::Delete);
    }

    /// Number of buffered writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Apply the write set atomically. Fails without side effect when a
    /// write names a missing namespace.
    pub fn commit(self) -> Result<()> {
        let durability = self.env.durability;
        {
            let mut guard = self.env.trees.write();
            for (tree, _) in self.writes.keys() {
                if !guard.contains_key(tree) {
                    return err_at!(StoreFail, msg: "no such namespace {}", tree);
                }
            }
            for ((tree, key), op) in self.writes.into_iter() {
                let t = guard.get_mut(&tree).unwrap(); // verified above
                match op {
                    Op::Put(val) => {
                        t.insert(key, val);
                    }
                    Op::Delete => {
                        t.remove(&key);
                    }
                }
            }
        }

        match durability {
            Durability::FullSync => self.env.checkpoint(),
            Durability::Deferred => Ok(()),
        }
    }

    /// Discard the write set.
    pub fn abort(self) {}
}
