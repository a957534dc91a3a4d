use std::{env, fs, path, sync::Arc};

use super::*;
use crate::{
    indexer::IndexKind,
    kvs::Durability,
    schema::AttrType,
};

fn make_env(name: &str) -> (path::PathBuf, Environment) {
    let mut dir = env::temp_dir();
    dir.push(format!("dirstore-index-{}-{}", name, rand::random::<u32>()));
    fs::remove_dir_all(&dir).ok();
    let db = Environment::open(&dir, Durability::Deferred).unwrap();
    (dir, db)
}

fn make_index(db: &Environment, entry_limit: usize) -> Index {
    let indexer = Indexer::new(IndexKind::Equality, Arc::new(AttrType::new("cn")));
    let index = Index::new("dc_example", indexer, entry_limit);
    db.create_tree(&index.tree).unwrap();
    index
}

#[test]
fn test_tree_name() {
    let (dir, db) = make_env("name");
    let index = make_index(&db, 10);
    assert_eq!(index.tree, "dc_example_cn.equality");
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_insert_remove() {
    let (dir, db) = make_env("ins");
    let index = make_index(&db, 10);

    let mut txn = db.txn();
    index.insert(&mut txn, b"alice", EntryId(1)).unwrap();
    index.insert(&mut txn, b"alice", EntryId(2)).unwrap();
    index.insert(&mut txn, b"alice", EntryId(2)).unwrap(); // idempotent
    txn.commit().unwrap();

    let set = index.read_key(&db, b"alice").unwrap();
    assert_eq!(set.len(), Some(2));
    assert!(set.contains(EntryId(1)) && set.contains(EntryId(2)));

    // absent key reads as the empty exact set
    assert!(index.read_key(&db, b"bob").unwrap().is_empty());

    let mut txn = db.txn();
    index.remove(&mut txn, b"alice", EntryId(1)).unwrap();
    txn.commit().unwrap();
    assert_eq!(index.read_key(&db, b"alice").unwrap().len(), Some(1));

    // removing the last id drops the record
    let mut txn = db.txn();
    index.remove(&mut txn, b"alice", EntryId(2)).unwrap();
    txn.commit().unwrap();
    assert_eq!(db.get(&index.tree, b"alice").unwrap(), None);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_entry_limit_degrade_one_way() {
    let (dir, db) = make_env("limit");
    let index = make_index(&db, 2);

    let mut txn = db.txn();
    for id in 1..=3 {
        index.insert(&mut txn, b"popular", EntryId(id)).unwrap();
    }
    txn.commit().unwrap();

    let set = index.read_key(&db, b"popular").unwrap();
    assert!(set.is_all());

    // degradation is one-way, deletes do not resurrect exact tracking
    let mut txn = db.txn();
    index.remove(&mut txn, b"popular", EntryId(1)).unwrap();
    index.remove(&mut txn, b"popular", EntryId(2)).unwrap();
    index.remove(&mut txn, b"popular", EntryId(3)).unwrap();
    txn.commit().unwrap();
    assert!(index.read_key(&db, b"popular").unwrap().is_all());

    // re-inserting at the limit stays degraded
    let mut txn = db.txn();
    index.insert(&mut txn, b"popular", EntryId(9)).unwrap();
    txn.commit().unwrap();
    assert!(index.read_key(&db, b"popular").unwrap().is_all());

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_read_range_and_prefix() {
    let (dir, db) = make_env("range");
    let index = make_index(&db, 10);

    let mut txn = db.txn();
    index.insert(&mut txn, b"aa", EntryId(1)).unwrap();
    index.insert(&mut txn, b"ab", EntryId(2)).unwrap();
    index.insert(&mut txn, b"b", EntryId(3)).unwrap();
    txn.commit().unwrap();

    let set = index.read_prefix(&db, b"a").unwrap();
    assert_eq!(set.len(), Some(2));
    assert!(set.contains(EntryId(1)) && set.contains(EntryId(2)));

    let set = index
        .read_range(&db, std::ops::Bound::Included(b"ab".to_vec()), std::ops::Bound::Unbounded)
        .unwrap();
    assert_eq!(set.len(), Some(2));
    assert!(set.contains(EntryId(2)) && set.contains(EntryId(3)));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_prefix_bounds_carry() {
    let (lo, hi) = prefix_bounds(b"ab");
    assert_eq!(lo, std::ops::Bound::Included(b"ab".to_vec()));
    assert_eq!(hi, std::ops::Bound::Excluded(b"ac".to_vec()));

    let (_, hi) = prefix_bounds(&[b'a', 0xff]);
    assert_eq!(hi, std::ops::Bound::Excluded(vec![b'b']));

    let (_, hi) = prefix_bounds(&[0xff, 0xff]);
    assert_eq!(hi, std::ops::Bound::Unbounded);
}

#[test]
fn test_load_merged() {
    let (dir, db) = make_env("merge");
    let index = make_index(&db, 4);

    index.load_merged(&db, b"k", vec![3, 1, 2]).unwrap();
    let set = index.read_key(&db, b"k").unwrap();
    assert_eq!(set.iter().map(|id| id.0).collect::<Vec<u64>>(), vec![1, 2, 3]);

    // limit policy applies on the bulk path too
    index.load_merged(&db, b"k", vec![4, 5, 6]).unwrap();
    assert!(index.read_key(&db, b"k").unwrap().is_all());

    fs::remove_dir_all(&dir).ok();
}
