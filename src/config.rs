//! Module `config` implement configuration types for the backend, read
//! from TOML or assembled in code via the `set_*` builders.

use serde::Deserialize;

use std::{convert::TryFrom, ffi, fs, path};

use crate::{
    index::DEFAULT_ENTRY_LIMIT,
    indexer::IndexKind,
    kvs::Durability,
    Error, Result,
};

/// One attribute-index declaration, an attribute name and the index
/// capabilities to maintain for it.
#[derive(Clone, Debug, Deserialize)]
pub struct IndexSpec {
    pub attr: String,
    pub kinds: Vec<String>,
    /// Per-index override of [BackendConfig::entry_limit].
    pub entry_limit: Option<usize>,
}

impl IndexSpec {
    pub fn new(attr: &str, kinds: &[&str]) -> IndexSpec {
        IndexSpec {
            attr: attr.to_lowercase(),
            kinds: kinds.iter().map(|k| k.to_string()).collect(),
            entry_limit: None,
        }
    }

    pub fn set_entry_limit(&mut self, limit: usize) -> &mut IndexSpec {
        self.entry_limit = Some(limit);
        self
    }

    pub fn to_kinds(&self) -> Result<Vec<IndexKind>> {
        let mut kinds = vec![];
        for kind in self.kinds.iter() {
            kinds.push(kind.parse()?);
        }
        Ok(kinds)
    }
}

/// Backend configuration, the store directory, the served base DNs and
/// the index declarations.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    /// Store directory, created as needed.
    pub dir: ffi::OsString,
    /// Base DNs to serve, one container each. Bases must not overlap.
    pub bases: Vec<String>,
    pub durability: Durability,
    /// Default per-key id ceiling for attribute indexes.
    pub entry_limit: usize,
    pub indexes: Vec<IndexSpec>,
}

impl BackendConfig {
    pub fn new(dir: &ffi::OsStr) -> BackendConfig {
        BackendConfig {
            dir: dir.to_os_string(),
            bases: vec![],
            durability: Durability::default(),
            entry_limit: DEFAULT_ENTRY_LIMIT,
            indexes: vec![],
        }
    }

    /// Load from a TOML file.
    pub fn from_file(loc: &path::Path) -> Result<BackendConfig> {
        let text = err_at!(IOError, fs::read_to_string(loc), "config {:?}", loc)?;
        let toml_config: TomlBackendConfig =
            err_at!(InvalidFile, toml::from_str(&text), "config {:?}", loc)?;
        BackendConfig::try_from(toml_config)
    }

    pub fn add_base(&mut self, base: &str) -> &mut BackendConfig {
        self.bases.push(base.to_string());
        self
    }

    pub fn add_index(&mut self, spec: IndexSpec) -> &mut BackendConfig {
        self.indexes.push(spec);
        self
    }

    pub fn set_durability(&mut self, durability: Durability) -> &mut BackendConfig {
        self.durability = durability;
        self
    }

    pub fn set_entry_limit(&mut self, limit: usize) -> &mut BackendConfig {
        self.entry_limit = limit;
        self
    }
}

// TOML rendition, optional knobs default here.
#[derive(Deserialize)]
struct TomlBackendConfig {
    dir: String,
    bases: Vec<String>,
    durability: Option<Durability>,
    entry_limit: Option<usize>,
    #[serde(default)]
    indexes: Vec<IndexSpec>,
}

impl TryFrom<TomlBackendConfig> for BackendConfig {
    type Error = Error;

    fn try_from(toml_config: TomlBackendConfig) -> Result<BackendConfig> {
        if toml_config.bases.is_empty() {
            return err_at!(InvalidInput, msg: "config names no base dn");
        }
        Ok(BackendConfig {
            dir: ffi::OsString::from(toml_config.dir),
            bases: toml_config.bases,
            durability: toml_config.durability.unwrap_or_default(),
            entry_limit: toml_config.entry_limit.unwrap_or(DEFAULT_ENTRY_LIMIT),
            indexes: toml_config.indexes,
        })
    }
}

/// Bulk-import tuning, every knob has a workable default.
#[derive(Clone, Debug)]
pub struct ImportConfig {
    /// Worker threads extracting index keys, defaults to the cpu count.
    pub threads: usize,
    /// Bounded depth of each worker's inbox, producer blocks when full.
    pub queue_size: usize,
    /// In-memory budget per index buffer before spilling a sorted run.
    pub buffer_bytes: usize,
    /// Scratch directory for spilled runs, defaults to the store dir.
    pub tmp_dir: Option<ffi::OsString>,
    pub mode: ImportMode,
}

/// What to do with entries already present at import time.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportMode {
    /// Keep existing entries, reject an imported duplicate DN.
    Append,
    /// Replace the content of entries already present, keeping their ids.
    Overwrite,
    /// Clear each target container before loading.
    Replace,
}

impl Default for ImportConfig {
    fn default() -> ImportConfig {
        ImportConfig {
            threads: num_cpus::get(),
            queue_size: 1024,
            buffer_bytes: 64 * 1024 * 1024,
            tmp_dir: None,
            mode: ImportMode::Append,
        }
    }
}

impl ImportConfig {
    pub fn set_threads(&mut self, threads: usize) -> &mut ImportConfig {
        self.threads = threads.max(1);
        self
    }

    pub fn set_queue_size(&mut self, queue_size: usize) -> &mut ImportConfig {
        self.queue_size = queue_size.max(1);
        self
    }

    pub fn set_buffer_bytes(&mut self, buffer_bytes: usize) -> &mut ImportConfig {
        self.buffer_bytes = buffer_bytes;
        self
    }

    pub fn set_tmp_dir(&mut self, tmp_dir: &ffi::OsStr) -> &mut ImportConfig {
        self.tmp_dir = Some(tmp_dir.to_os_string());
        self
    }

    pub fn set_mode(&mut self, mode: ImportMode) -> &mut ImportConfig {
        self.mode = mode;
        self
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
