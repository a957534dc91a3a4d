use std::{env, fs, ops::Bound, path};

use super::*;

fn make_dir(name: &str) -> path::PathBuf {
    let mut dir = env::temp_dir();
    dir.push(format!("dirstore-env-{}-{}", name, rand::random::<u32>()));
    fs::remove_dir_all(&dir).ok();
    dir
}

#[test]
fn test_basic_ops() {
    let dir = make_dir("basic");
    let db = Environment::open(&dir, Durability::Deferred).unwrap();

    db.create_tree("t1").unwrap();
    assert!(db.has_tree("t1"));
    assert!(!db.has_tree("t2"));
    assert_eq!(db.list_trees(), vec!["t1".to_string()]);

    assert_eq!(db.put("t1", b"a".to_vec(), b"1".to_vec()).unwrap(), None);
    assert_eq!(
        db.put("t1", b"a".to_vec(), b"2".to_vec()).unwrap(),
        Some(b"1".to_vec())
    );
    assert_eq!(db.get("t1", b"a").unwrap(), Some(b"2".to_vec()));
    assert_eq!(db.get("t1", b"z").unwrap(), None);
    assert_eq!(db.tree_len("t1").unwrap(), 1);

    assert_eq!(db.delete("t1", b"a").unwrap(), Some(b"2".to_vec()));
    assert_eq!(db.get("t1", b"a").unwrap(), None);

    assert!(db.get("nope", b"a").is_err());
    assert!(db.put("nope", b"a".to_vec(), b"1".to_vec()).is_err());

    db.drop_tree("t1").unwrap();
    assert!(!db.has_tree("t1"));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_range() {
    let dir = make_dir("range");
    let db = Environment::open(&dir, Durability::Deferred).unwrap();
    db.create_tree("t").unwrap();
    for k in ["a", "b", "c", "d"].iter() {
        db.put("t", k.as_bytes().to_vec(), k.as_bytes().to_vec()).unwrap();
    }

    let items = db
        .range("t", Bound::Included(b"b".to_vec()), Bound::Excluded(b"d".to_vec()))
        .unwrap();
    let keys: Vec<Vec<u8>> = items.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);

    let items = db.range("t", Bound::Unbounded, Bound::Unbounded).unwrap();
    assert_eq!(items.len(), 4);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_txn_overlay_and_commit() {
    let dir = make_dir("txn");
    let db = Environment::open(&dir, Durability::Deferred).unwrap();
    db.create_tree("t").unwrap();
    db.put("t", b"a".to_vec(), b"old".to_vec()).unwrap();

    let mut txn = db.txn();
    txn.put("t", b"a".to_vec(), b"new".to_vec());
    txn.put("t", b"b".to_vec(), b"2".to_vec());
    txn.delete("t", b"c".to_vec());
    assert_eq!(txn.len(), 3);

    // own writes visible inside, not outside
    assert_eq!(txn.get("t", b"a").unwrap(), Some(b"new".to_vec()));
    assert_eq!(txn.get("t", b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(db.get("t", b"a").unwrap(), Some(b"old".to_vec()));
    assert_eq!(db.get("t", b"b").unwrap(), None);

    txn.commit().unwrap();
    assert_eq!(db.get("t", b"a").unwrap(), Some(b"new".to_vec()));
    assert_eq!(db.get("t", b"b").unwrap(), Some(b"2".to_vec()));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_txn_abort() {
    let dir = make_dir("abort");
    let db = Environment::open(&dir, Durability::Deferred).unwrap();
    db.create_tree("t").unwrap();

    let mut txn = db.txn();
    txn.put("t", b"a".to_vec(), b"1".to_vec());
    txn.abort();
    assert_eq!(db.get("t", b"a").unwrap(), None);

    // dropping without commit aborts as well
    let mut txn = db.txn();
    txn.put("t", b"b".to_vec(), b"1".to_vec());
    std::mem::drop(txn);
    assert_eq!(db.get("t", b"b").unwrap(), None);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_txn_commit_missing_tree() {
    let dir = make_dir("missing");
    let db = Environment::open(&dir, Durability::Deferred).unwrap();
    db.create_tree("t").unwrap();

    let mut txn = db.txn();
    txn.put("t", b"a".to_vec(), b"1".to_vec());
    txn.put("gone", b"b".to_vec(), b"1".to_vec());
    assert!(txn.commit().is_err());

    // failed commit leaves no side effect
    assert_eq!(db.get("t", b"a").unwrap(), None);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_checkpoint_recovery() {
    let dir = make_dir("ckpt");
    {
        let db = Environment::open(&dir, Durability::Deferred).unwrap();
        db.create_tree("t").unwrap();
        db.put("t", b"a".to_vec(), b"1".to_vec()).unwrap();
        db.put("t", b"b".to_vec(), b"2".to_vec()).unwrap();
        db.close().unwrap();
    }
    {
        let db = Environment::open(&dir, Durability::Deferred).unwrap();
        assert!(db.has_tree("t"));
        assert_eq!(db.get("t", b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get("t", b"b").unwrap(), Some(b"2".to_vec()));
    }
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_corrupt_checkpoint() {
    let dir = make_dir("corrupt");
    {
        let db = Environment::open(&dir, Durability::Deferred).unwrap();
        db.create_tree("t").unwrap();
        db.put("t", b"a".to_vec(), b"1".to_vec()).unwrap();
        db.close().unwrap();
    }
    // flip a payload byte, the crc check must refuse the file
    let loc = dir.join("dirstore.ckpt");
    let mut data = fs::read(&loc).unwrap();
    data[0] ^= 0xff;
    fs::write(&loc, &data).unwrap();

    assert!(Environment::open(&dir, Durability::Deferred).is_err());
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_second_open_refused() {
    let dir = make_dir("lock");
    let db = Environment::open(&dir, Durability::Deferred).unwrap();
    assert!(Environment::open(&dir, Durability::Deferred).is_err());
    std::mem::drop(db);
    assert!(Environment::open(&dir, Durability::Deferred).is_ok());
    fs::remove_dir_all(&dir).ok();
}
