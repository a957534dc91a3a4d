use std::{collections::BTreeMap, env, fs, path};

use super::*;

fn make_dir(name: &str) -> path::PathBuf {
    let mut dir = env::temp_dir();
    dir.push(format!("dirstore-buffer-{}-{}", name, rand::random::<u32>()));
    fs::remove_dir_all(&dir).ok();
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn drain(sources: Vec<RunSource>) -> Vec<(Vec<u8>, Vec<u64>)> {
    let mut out = vec![];
    merge_sources(sources, |key, ids| {
        out.push((key, ids));
        Ok(())
    })
    .unwrap();
    out
}

#[test]
fn test_in_memory_only() {
    let dir = make_dir("mem");
    let mut buf = KeyBuffer::new(&dir, "t", 1 << 20);
    buf.add(b"b".to_vec(), 2).unwrap();
    buf.add(b"a".to_vec(), 1).unwrap();
    buf.add(b"b".to_vec(), 1).unwrap();
    buf.add(b"b".to_vec(), 2).unwrap(); // duplicate posting

    let got = drain(buf.into_sources().unwrap());
    assert_eq!(
        got,
        vec![(b"a".to_vec(), vec![1]), (b"b".to_vec(), vec![1, 2])]
    );
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_spill_and_merge() {
    let dir = make_dir("spill");
    // tiny budget forces a spill on nearly every add
    let mut buf = KeyBuffer::new(&dir, "t", 16);
    for id in 0..100_u64 {
        buf.add(format!("key-{:02}", id % 10).into_bytes(), id).unwrap();
    }

    let sources = buf.into_sources().unwrap();
    assert!(sources.len() > 1, "expected spilled runs");

    let got = drain(sources);
    assert_eq!(got.len(), 10);
    for (i, (key, ids)) in got.iter().enumerate() {
        assert_eq!(key, format!("key-{:02}", i).as_bytes());
        let want: Vec<u64> = (0..100).filter(|id| (id % 10) as usize == i).collect();
        assert_eq!(ids, &want);
    }

    // run files are reclaimed by the merge
    let left: Vec<_> = fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".run"))
        .collect();
    assert!(left.is_empty(), "{:?}", left);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_failed_merge_reclaims_runs() {
    let dir = make_dir("failmerge");
    let mut buf = KeyBuffer::new(&dir, "t", 16);
    for id in 0..50_u64 {
        buf.add(format!("key-{:02}", id % 5).into_bytes(), id).unwrap();
    }
    let sources = buf.into_sources().unwrap();
    assert!(sources.len() > 1, "expected spilled runs");

    // sink fails after the first key, the merge stops partway
    let mut n = 0;
    let res = merge_sources(sources, |_key, _ids| {
        n += 1;
        match n {
            1 => Ok(()),
            _ => err_at!(Fatal, msg: "sink full"),
        }
    });
    assert!(res.is_err());

    // no scratch file survives the aborted merge
    let left: Vec<_> = fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".run"))
        .collect();
    assert!(left.is_empty(), "{:?}", left);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_merge_across_buffers() {
    let dir = make_dir("across");
    let mut a = KeyBuffer::new(&dir, "a", 1 << 20);
    let mut b = KeyBuffer::new(&dir, "b", 1 << 20);
    a.add(b"k1".to_vec(), 1).unwrap();
    a.add(b"k2".to_vec(), 3).unwrap();
    b.add(b"k1".to_vec(), 2).unwrap();
    b.add(b"k3".to_vec(), 4).unwrap();

    let mut sources = a.into_sources().unwrap();
    sources.extend(b.into_sources().unwrap());
    let got: BTreeMap<Vec<u8>, Vec<u64>> = drain(sources).into_iter().collect();

    assert_eq!(got.len(), 3);
    assert_eq!(got[b"k1".as_ref()], vec![1, 2]);
    assert_eq!(got[b"k2".as_ref()], vec![3]);
    assert_eq!(got[b"k3".as_ref()], vec![4]);
    fs::remove_dir_all(&dir).ok();
}
