use arbitrary::{Arbitrary, Unstructured};
use rand::{prelude::random, rngs::StdRng, Rng, SeedableRng};

use std::collections::BTreeSet;

use super::*;

#[test]
fn test_key_roundtrip() {
    let id = EntryId(0x1122334455667788);
    assert_eq!(EntryId::from_key(&id.to_key()).unwrap(), id);
    assert!(EntryId::from_key(b"short").is_err());

    // big-endian keys preserve numeric order
    assert!(EntryId(255).to_key() < EntryId(256).to_key());
}

#[test]
fn test_membership() {
    let seed: u64 = random();
    println!("test_membership seed:{}", seed);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut set = IdSet::new();
    let mut refset: BTreeSet<u64> = BTreeSet::new();
    for _ in 0..10_000 {
        let id = rng.gen::<u64>() % 1000;
        match rng.gen::<u8>() % 3 {
            0 => assert_eq!(set.insert(EntryId(id)), refset.insert(id)),
            1 => assert_eq!(set.remove(EntryId(id)), refset.remove(&id)),
            _ => assert_eq!(set.contains(EntryId(id)), refset.contains(&id)),
        }
    }
    assert_eq!(set.len(), Some(refset.len()));
    let ids: Vec<u64> = set.iter().map(|id| id.0).collect();
    assert_eq!(ids, refset.iter().copied().collect::<Vec<u64>>());
}

#[test]
fn test_all_sentinel() {
    let mut set = IdSet::from_ids(vec![3, 1, 2, 2]);
    assert_eq!(set.len(), Some(3));

    set.degrade();
    assert!(set.is_all());
    assert_eq!(set.len(), None);
    assert!(!set.is_empty());
    assert!(set.contains(EntryId(999)));

    // inserts and removes are no-ops on the sentinel
    assert!(!set.insert(EntryId(7)));
    assert!(!set.remove(EntryId(7)));
    assert!(set.is_all());
    assert_eq!(set.iter().count(), 0);
}

#[test]
fn test_intersect_union() {
    let seed: u64 = random();
    println!("test_intersect_union seed:{}", seed);
    let mut rng = StdRng::seed_from_u64(seed);

    for _ in 0..100 {
        let a: BTreeSet<u64> = (0..rng.gen::<usize>() % 100).map(|_| rng.gen::<u64>() % 200).collect();
        let b: BTreeSet<u64> = (0..rng.gen::<usize>() % 100).map(|_| rng.gen::<u64>() % 200).collect();
        let sa = IdSet::from_ids(a.iter().copied().collect());
        let sb = IdSet::from_ids(b.iter().copied().collect());

        let inter: Vec<u64> = sa.clone().intersect(sb.clone()).iter().map(|id| id.0).collect();
        assert_eq!(inter, a.intersection(&b).copied().collect::<Vec<u64>>());

        let uni: Vec<u64> = sa.clone().union(sb.clone()).iter().map(|id| id.0).collect();
        assert_eq!(uni, a.union(&b).copied().collect::<Vec<u64>>());

        // sentinel is intersect-identity and union-absorbing
        assert_eq!(IdSet::All.intersect(sa.clone()), sa);
        assert!(sb.clone().union(IdSet::All).is_all());
    }
}

#[test]
fn test_idset_ops() {
    let seed: u64 = random();
    println!("test_idset_ops seed:{}", seed);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut bytes = vec![0_u8; 64 * 1024];
    rng.fill(bytes.as_mut_slice());
    let mut uns = Unstructured::new(&bytes);

    let mut set = IdSet::new();
    let mut refset: BTreeSet<u64> = BTreeSet::new();
    while let Ok(op) = Op::arbitrary(&mut uns) {
        match op {
            Op::Insert(id) => {
                let id = id % 1000;
                assert_eq!(set.insert(EntryId(id)), refset.insert(id));
            }
            Op::Remove(id) => {
                let id = id % 1000;
                assert_eq!(set.remove(EntryId(id)), refset.remove(&id));
            }
            Op::Contains(id) => {
                let id = id % 1000;
                assert_eq!(set.contains(EntryId(id)), refset.contains(&id));
            }
            Op::Len => assert_eq!(set.len(), Some(refset.len())),
            Op::Roundtrip => {
                let back = IdSet::from_bytes(&set.to_bytes().unwrap()).unwrap();
                assert_eq!(back, set);
            }
        }
        if uns.is_empty() {
            break;
        }
    }
    let ids: Vec<u64> = set.iter().map(|id| id.0).collect();
    assert_eq!(ids, refset.iter().copied().collect::<Vec<u64>>());
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    Insert(u64),
    Remove(u64),
    Contains(u64),
    Len,
    Roundtrip,
}

#[test]
fn test_bytes_roundtrip() {
    let set = IdSet::from_ids(vec![1, 5, 9, 1 << 40]);
    let back = IdSet::from_bytes(&set.to_bytes().unwrap()).unwrap();
    assert_eq!(set, back);

    let back = IdSet::from_bytes(&IdSet::All.to_bytes().unwrap()).unwrap();
    assert!(back.is_all());
}
