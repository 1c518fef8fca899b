mod support;

use std::fs;

use mediameta::{LocalFile, MemoryFile, MetaError, TagFile};
use pretty_assertions::assert_eq;
use support::pattern;

const FILE_LEN: usize = 5000;

fn expected(original: &[u8], data: &[u8], start: usize, replace: usize) -> Vec<u8> {
    let mut out = original.to_vec();
    if start > out.len() {
        out.resize(start, 0);
    }
    let end = (start + replace).min(out.len());
    out.splice(start..end, data.iter().copied());
    out
}

fn cases() -> Vec<(Vec<u8>, usize, usize)> {
    let mut cases = Vec::new();
    for len in [10usize, 1500, 3000] {
        let data = vec![0xEE; len];
        for start in [0usize, 100, FILE_LEN - 10] {
            for replace in [0, len - 1, len, len + 1, FILE_LEN] {
                cases.push((data.clone(), start, replace));
            }
        }
    }
    cases
}

#[test]
fn insert_grid_on_memory_files() {
    let original = pattern(FILE_LEN);
    for (data, start, replace) in cases() {
        let mem = MemoryFile::new("grid.bin", original.clone());
        let mut file = TagFile::new(mem.clone());
        file.insert(&data, start as u64, replace as u64).unwrap();
        assert_eq!(
            mem.contents(),
            expected(&original, &data, start, replace),
            "len {} start {} replace {}",
            data.len(),
            start,
            replace
        );
    }
}

#[test]
fn insert_grid_on_local_files() {
    let original = pattern(FILE_LEN);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grid.bin");
    for (data, start, replace) in cases().into_iter().step_by(4) {
        fs::write(&path, &original).unwrap();
        {
            let mut file = TagFile::new(LocalFile::new(&path));
            file.insert(&data, start as u64, replace as u64).unwrap();
        }
        assert_eq!(fs::read(&path).unwrap(), expected(&original, &data, start, replace));
    }
}

#[test]
fn insert_past_the_end_zero_fills() {
    let mem = MemoryFile::new("gap.bin", vec![1, 2, 3]);
    let mut file = TagFile::new(mem.clone());
    file.insert(b"xy", 6, 10).unwrap();
    assert_eq!(mem.contents(), vec![1, 2, 3, 0, 0, 0, b'x', b'y']);
}

#[test]
fn remove_block_shifts_the_tail() {
    let original = pattern(FILE_LEN);
    let mem = MemoryFile::new("rm.bin", original.clone());
    let mut file = TagFile::new(mem.clone());
    file.remove_block(1000, 0).unwrap();
    assert_eq!(mem.contents(), original);
    file.remove_block(1000, 2500).unwrap();
    let mut want = original[..1000].to_vec();
    want.extend_from_slice(&original[3500..]);
    assert_eq!(mem.contents(), want);
}

#[test]
fn streaming_search_crosses_window_boundaries() {
    let mut data = vec![0u8; 4000];
    data[1022..1026].copy_from_slice(b"NEED");
    data[3000..3004].copy_from_slice(b"STOP");
    data[3500..3504].copy_from_slice(b"NEED");
    let mut file = TagFile::new(MemoryFile::new("find.bin", data));
    assert_eq!(file.find(b"NEED", 0, None).unwrap(), Some(1022));
    assert_eq!(file.find(b"NEED", 1023, Some(b"STOP")).unwrap(), None);
    assert_eq!(file.find(b"NEED", 1023, None).unwrap(), Some(3500));
    assert_eq!(file.rfind(b"NEED", None, None).unwrap(), Some(3500));
    assert_eq!(file.rfind(b"NEED", Some(3400), None).unwrap(), Some(1022));
    assert_eq!(file.rfind(b"NEED", Some(3400), Some(b"STOP")).unwrap(), None);
}

#[test]
fn corrupt_files_refuse_writes() {
    let mem = MemoryFile::new("c.bin", pattern(100));
    let mut file = TagFile::new(mem.clone());
    file.mark_corrupt("test reason");
    let err = file.insert(b"x", 0, 0).unwrap_err();
    match err {
        MetaError::PossiblyCorrupt(reasons) => assert_eq!(reasons, vec!["test reason".to_string()]),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(mem.contents(), pattern(100));
}
