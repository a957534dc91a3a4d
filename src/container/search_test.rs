use std::{env, fs, path, sync::Arc};

use super::*;
use crate::{
    config::IndexSpec,
    entry::Attr,
    kvs::{Durability, Environment},
    root::IdAllocator,
    schema::DEFAULT_SCHEMA,
    Error,
};

fn open_seeded(name: &str) -> (path::PathBuf, EntryContainer) {
    let mut dir = env::temp_dir();
    dir.push(format!("dirstore-search-{}-{}", name, rand::random::<u32>()));
    fs::remove_dir_all(&dir).ok();

    let db = Arc::new(Environment::open(&dir, Durability::Deferred).unwrap());
    let alloc = Arc::new(IdAllocator::new(1));
    let specs = vec![
        IndexSpec::new("cn", &["equality", "presence", "substring", "approximate"]),
        IndexSpec::new("uidnumber", &["ordering"]),
    ];
    let base: Dn = "dc=example".parse().unwrap();
    let container =
        EntryContainer::open(db, alloc, Arc::clone(&DEFAULT_SCHEMA), base, &specs, 100).unwrap();

    let add = |dn: &str, cn: Option<&str>, uid: Option<&str>| {
        let dn: Dn = dn.parse().unwrap();
        let mut e = Entry::new(&dn).set_str("objectclass", "top");
        if let Some(cn) = cn {
            e = e.set_attr(Attr::new("cn").add_value(cn.as_bytes()));
        }
        if let Some(uid) = uid {
            e = e.set_str("uidnumber", uid);
        }
        container.add(&e).unwrap();
    };
    add("dc=example", None, None);
    add("ou=people,dc=example", None, None);
    add("cn=alexander,ou=people,dc=example", Some("Alexander"), Some("1001"));
    add("cn=alice,ou=people,dc=example", Some("Alice"), Some("1002"));
    add("cn=robert,ou=people,dc=example", Some("Robert"), Some("1010"));

    (dir, container)
}

fn dns(hits: &[(crate::idset::EntryId, Entry)]) -> Vec<String> {
    let mut out: Vec<String> = hits.iter().map(|(_, e)| e.dn.clone()).collect();
    out.sort();
    out
}

#[test]
fn test_scope() {
    let (dir, container) = open_seeded("scope");
    let base: Dn = "dc=example".parse().unwrap();
    let people: Dn = "ou=people,dc=example".parse().unwrap();

    let filter = Filter::Present { attr: "objectclass".to_string() };
    let req = SearchRequest::new(base.clone(), Scope::Base, filter.clone());
    assert_eq!(container.search(&req).unwrap().len(), 1);

    let req = SearchRequest::new(base.clone(), Scope::One, filter.clone());
    assert_eq!(dns(&container.search(&req).unwrap()), vec!["ou=people,dc=example"]);

    let req = SearchRequest::new(base.clone(), Scope::Subtree, filter.clone());
    assert_eq!(container.search(&req).unwrap().len(), 5);

    let req = SearchRequest::new(people, Scope::Subtree, filter.clone());
    assert_eq!(container.search(&req).unwrap().len(), 4);

    let ghost: Dn = "ou=ghost,dc=example".parse().unwrap();
    let req = SearchRequest::new(ghost, Scope::Base, filter);
    assert!(matches!(container.search(&req), Err(Error::EntryNotFound(_, _))));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_equality_and_presence() {
    let (dir, container) = open_seeded("eq");
    let base: Dn = "dc=example".parse().unwrap();

    let filter = Filter::Equality { attr: "cn".to_string(), value: b"ALICE".to_vec() };
    let req = SearchRequest::new(base.clone(), Scope::Subtree, filter);
    assert_eq!(dns(&container.search(&req).unwrap()), vec!["cn=alice,ou=people,dc=example"]);

    let filter = Filter::Present { attr: "cn".to_string() };
    let req = SearchRequest::new(base.clone(), Scope::Subtree, filter);
    assert_eq!(container.search(&req).unwrap().len(), 3);

    // unindexed attribute still answers, via re-checked scan
    let filter = Filter::Equality { attr: "uidnumber".to_string(), value: b"1002".to_vec() };
    let req = SearchRequest::new(base, Scope::Subtree, filter);
    assert_eq!(dns(&container.search(&req).unwrap()), vec!["cn=alice,ou=people,dc=example"]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_substring() {
    let (dir, container) = open_seeded("sub");
    let base: Dn = "dc=example".parse().unwrap();

    // short fragment, resolved by prefix scan
    let filter = Filter::Substring {
        attr: "cn".to_string(),
        initial: Some(b"al".to_vec()),
        any: vec![],
        tail: None,
    };
    let req = SearchRequest::new(base.clone(), Scope::Subtree, filter);
    assert_eq!(
        dns(&container.search(&req).unwrap()),
        vec!["cn=alexander,ou=people,dc=example", "cn=alice,ou=people,dc=example"]
    );

    // fragment above the window size, intersected window by window
    let filter = Filter::Substring {
        attr: "cn".to_string(),
        initial: None,
        any: vec![b"lexande".to_vec()],
        tail: None,
    };
    let req = SearchRequest::new(base.clone(), Scope::Subtree, filter);
    assert_eq!(dns(&container.search(&req).unwrap()), vec!["cn=alexander,ou=people,dc=example"]);

    // final fragment must anchor at the end
    let filter = Filter::Substring {
        attr: "cn".to_string(),
        initial: None,
        any: vec![],
        tail: Some(b"ice".to_vec()),
    };
    let req = SearchRequest::new(base, Scope::Subtree, filter);
    assert_eq!(dns(&container.search(&req).unwrap()), vec!["cn=alice,ou=people,dc=example"]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_ordering_and_approx() {
    let (dir, container) = open_seeded("ord");
    let base: Dn = "dc=example".parse().unwrap();

    let ge = Filter::Ge { attr: "uidnumber".to_string(), value: b"1002".to_vec() };
    let le = Filter::Le { attr: "uidnumber".to_string(), value: b"1005".to_vec() };
    let req = SearchRequest::new(base.clone(), Scope::Subtree, Filter::And(vec![ge, le]));
    assert_eq!(dns(&container.search(&req).unwrap()), vec!["cn=alice,ou=people,dc=example"]);

    let filter = Filter::Approx { attr: "cn".to_string(), value: b"Rupert".to_vec() };
    let req = SearchRequest::new(base, Scope::Subtree, filter);
    assert_eq!(dns(&container.search(&req).unwrap()), vec!["cn=robert,ou=people,dc=example"]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_boolean_composition() {
    let (dir, container) = open_seeded("bool");
    let base: Dn = "dc=example".parse().unwrap();

    let alice = Filter::Equality { attr: "cn".to_string(), value: b"alice".to_vec() };
    let robert = Filter::Equality { attr: "cn".to_string(), value: b"robert".to_vec() };

    let req = SearchRequest::new(base.clone(), Scope::Subtree, Filter::Or(vec![alice.clone(), robert]));
    assert_eq!(container.search(&req).unwrap().len(), 2);

    // negation resolves to a full scan with the re-check doing the work
    let not_alice = Filter::And(vec![
        Filter::Present { attr: "cn".to_string() },
        Filter::Not(Box::new(alice)),
    ]);
    let req = SearchRequest::new(base.clone(), Scope::Subtree, not_alice);
    assert_eq!(
        dns(&container.search(&req).unwrap()),
        vec!["cn=alexander,ou=people,dc=example", "cn=robert,ou=people,dc=example"]
    );

    let mut req = SearchRequest::new(
        base,
        Scope::Subtree,
        Filter::Present { attr: "objectclass".to_string() },
    );
    req.set_size_limit(2);
    assert_eq!(container.search(&req).unwrap().len(), 2);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_degraded_key_still_answers_exactly() {
    let mut dir = env::temp_dir();
    dir.push(format!("dirstore-search-degraded-{}", rand::random::<u32>()));
    fs::remove_dir_all(&dir).ok();

    let db = Arc::new(Environment::open(&dir, Durability::Deferred).unwrap());
    let alloc = Arc::new(IdAllocator::new(1));
    let specs = vec![IndexSpec::new("ou", &["equality"])];
    let base: Dn = "dc=example".parse().unwrap();
    // entry-limit 2 degrades the shared ou value quickly
    let container =
        EntryContainer::open(db, alloc, Arc::clone(&DEFAULT_SCHEMA), base.clone(), &specs, 2)
            .unwrap();

    container.add(&Entry::new(&base).set_str("dc", "example")).unwrap();
    for i in 0..4 {
        let dn: Dn = format!("ou=unit{},dc=example", i).parse().unwrap();
        let e = Entry::new(&dn).set_str("ou", "shared");
        container.add(&e).unwrap();
    }

    let eq = &container.as_indexes()[0];
    assert!(eq.read_key(container.as_env(), b"shared").unwrap().is_all());

    // candidates over-approximate, the final filter check trims exactly
    let filter = Filter::Equality { attr: "ou".to_string(), value: b"shared".to_vec() };
    let req = SearchRequest::new(base, Scope::Subtree, filter);
    assert_eq!(container.search(&req).unwrap().len(), 4);

    fs::remove_dir_all(&dir).ok();
}
