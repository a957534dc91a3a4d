use std::sync::Arc;

use super::*;
use crate::{
    entry::{Attr, Entry},
    schema::AttrType,
};

fn entry(values: &[&str]) -> Entry {
    let dn: crate::dn::Dn = "cn=x,dc=example".parse().unwrap();
    let mut attr = Attr::new("cn");
    for v in values.iter() {
        attr = attr.add_value(v.as_bytes());
    }
    Entry::new(&dn).set_attr(attr)
}

fn indexer(kind: IndexKind) -> Indexer {
    Indexer::new(kind, Arc::new(AttrType::new("cn").set_approximate(true)))
}

#[test]
fn test_kind_parse_display() {
    for kind in [
        IndexKind::Equality,
        IndexKind::Presence,
        IndexKind::Substring,
        IndexKind::Ordering,
        IndexKind::Approximate,
    ]
    .iter()
    {
        let back: IndexKind = kind.to_string().parse().unwrap();
        assert_eq!(back, *kind);
    }
    assert_eq!("eq".parse::<IndexKind>().unwrap(), IndexKind::Equality);
    assert_eq!("pres".parse::<IndexKind>().unwrap(), IndexKind::Presence);
    assert!("bloom".parse::<IndexKind>().is_err());
}

#[test]
fn test_equality_keys() {
    let ix = indexer(IndexKind::Equality);
    let keys = ix.index_entry(&entry(&["Alice  Smith", "ALICE SMITH", "bob"]));
    // two values normalize to the same key
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&b"alice smith".to_vec()));
    assert!(keys.contains(&b"bob".to_vec()));

    // absent attribute contributes nothing
    let other = Entry::new(&"ou=y,dc=example".parse().unwrap());
    assert!(ix.index_entry(&other).is_empty());
}

#[test]
fn test_presence_keys() {
    let ix = indexer(IndexKind::Presence);
    let keys = ix.index_entry(&entry(&["a", "b", "c"]));
    assert_eq!(keys.len(), 1);
    assert!(keys.contains(&PRESENCE_KEY.to_vec()));
}

#[test]
fn test_substring_keys() {
    let keys = substring_keys(b"alexander");
    assert_eq!(keys.len(), 9); // one per position
    assert_eq!(keys[0], b"alexan".to_vec());
    assert_eq!(keys[8], b"r".to_vec());

    let ix = indexer(IndexKind::Substring);
    let keys = ix.index_entry(&entry(&["abc"]));
    assert_eq!(keys.len(), 3);
    assert!(keys.contains(&b"abc".to_vec()));
    assert!(keys.contains(&b"bc".to_vec()));
    assert!(keys.contains(&b"c".to_vec()));
}

#[test]
fn test_substring_windows() {
    assert!(substring_windows(b"alex").is_empty());
    assert_eq!(substring_windows(b"alexan"), vec![b"alexan".to_vec()]);
    assert_eq!(
        substring_windows(b"alexand"),
        vec![b"alexan".to_vec(), b"lexand".to_vec()]
    );
}

#[test]
fn test_skip_unnormalizable_value() {
    let ix = indexer(IndexKind::Equality);
    let dn: crate::dn::Dn = "cn=x,dc=example".parse().unwrap();
    let e = Entry::new(&dn)
        .set_attr(Attr::new("cn").add_value(&[0xff, 0xfe]).add_value(b"ok"));
    let keys = ix.index_entry(&e);
    assert_eq!(keys.len(), 1);
    assert!(keys.contains(&b"ok".to_vec()));
}

#[test]
fn test_diff_keys_no_churn() {
    let ix = indexer(IndexKind::Equality);
    let old = entry(&["alice", "bob"]);
    let new = entry(&["alice", "carol"]);

    let delta = ix.diff_keys(&old, &new);
    assert_eq!(delta.len(), 2);
    // surviving value "alice" appears on neither side
    assert_eq!(delta.get(b"bob".as_ref()), Some(&false));
    assert_eq!(delta.get(b"carol".as_ref()), Some(&true));

    assert!(ix.diff_keys(&old, &old).is_empty());
}

#[test]
fn test_diff_keys_presence() {
    let ix = indexer(IndexKind::Presence);
    let old = entry(&["alice"]);
    let gone = Entry::new(&"cn=x,dc=example".parse().unwrap());

    let delta = ix.diff_keys(&old, &gone);
    assert_eq!(delta.get(PRESENCE_KEY), Some(&false));

    let delta = ix.diff_keys(&gone, &old);
    assert_eq!(delta.get(PRESENCE_KEY), Some(&true));

    // value change with the attribute still present, no churn
    assert!(ix.diff_keys(&old, &entry(&["bob"])).is_empty());
}
