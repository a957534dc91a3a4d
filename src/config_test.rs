use std::{env, ffi, fs};

use super::*;
use crate::indexer::IndexKind;

#[test]
fn test_index_spec() {
    let mut spec = IndexSpec::new("CN", &["equality", "presence", "sub"]);
    assert_eq!(spec.attr, "cn");
    assert_eq!(
        spec.to_kinds().unwrap(),
        vec![IndexKind::Equality, IndexKind::Presence, IndexKind::Substring]
    );
    spec.set_entry_limit(100);
    assert_eq!(spec.entry_limit, Some(100));

    let bad = IndexSpec::new("cn", &["bloom"]);
    assert!(bad.to_kinds().is_err());
}

#[test]
fn test_backend_config_builders() {
    let mut config = BackendConfig::new(ffi::OsStr::new("/tmp/store"));
    config
        .add_base("dc=example,dc=com")
        .add_index(IndexSpec::new("cn", &["equality"]))
        .set_durability(Durability::FullSync)
        .set_entry_limit(100);

    assert_eq!(config.bases, vec!["dc=example,dc=com".to_string()]);
    assert_eq!(config.durability, Durability::FullSync);
    assert_eq!(config.entry_limit, 100);
    assert_eq!(config.indexes.len(), 1);
}

#[test]
fn test_from_toml() {
    let text = r#"
        dir = "/tmp/dirstore-test"
        bases = ["dc=example,dc=com", "o=acme"]
        durability = "full-sync"
        entry_limit = 500

        [[indexes]]
        attr = "cn"
        kinds = ["equality", "substring"]

        [[indexes]]
        attr = "uidnumber"
        kinds = ["ordering"]
        entry_limit = 50
    "#;

    let mut loc = env::temp_dir();
    loc.push(format!("dirstore-config-{}.toml", rand::random::<u32>()));
    fs::write(&loc, text).unwrap();

    let config = BackendConfig::from_file(&loc).unwrap();
    assert_eq!(config.dir, ffi::OsString::from("/tmp/dirstore-test"));
    assert_eq!(config.bases.len(), 2);
    assert_eq!(config.durability, Durability::FullSync);
    assert_eq!(config.entry_limit, 500);
    assert_eq!(config.indexes.len(), 2);
    assert_eq!(config.indexes[1].entry_limit, Some(50));

    fs::remove_file(&loc).ok();
}

#[test]
fn test_from_toml_defaults() {
    let text = r#"
        dir = "/tmp/x"
        bases = ["dc=example"]
    "#;
    let mut loc = env::temp_dir();
    loc.push(format!("dirstore-config-{}.toml", rand::random::<u32>()));
    fs::write(&loc, text).unwrap();

    let config = BackendConfig::from_file(&loc).unwrap();
    assert_eq!(config.durability, Durability::Deferred);
    assert_eq!(config.entry_limit, crate::index::DEFAULT_ENTRY_LIMIT);
    assert!(config.indexes.is_empty());

    fs::remove_file(&loc).ok();
}

#[test]
fn test_from_toml_no_bases() {
    let mut loc = env::temp_dir();
    loc.push(format!("dirstore-config-{}.toml", rand::random::<u32>()));
    fs::write(&loc, "dir = \"/tmp/x\"\nbases = []\n").unwrap();
    assert!(BackendConfig::from_file(&loc).is_err());
    fs::remove_file(&loc).ok();
}

#[test]
fn test_import_config() {
    let config = ImportConfig::default();
    assert!(config.threads >= 1);
    assert_eq!(config.mode, ImportMode::Append);

    let mut config = ImportConfig::default();
    config.set_threads(0).set_queue_size(0).set_mode(ImportMode::Replace);
    assert_eq!(config.threads, 1);
    assert_eq!(config.queue_size, 1);
    assert_eq!(config.mode, ImportMode::Replace);
}
