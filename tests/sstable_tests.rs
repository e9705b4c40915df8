// Segments: building, point lookups at a snapshot, cursors and corruption.

use std::fs;
use std::sync::Arc;

use tempfile::tempdir;
use txkv::error::Error;
use txkv::iterator::{StorageIterator, VersionedIterator};
use txkv::sstable::{SSTable, SSTableBuilder};
use txkv::types::{InternalKey, Lookup, ValueType};

fn put(key: &[u8], seq: u64) -> InternalKey {
    InternalKey::new(key.to_vec(), seq, ValueType::Put)
}

fn found(v: &[u8]) -> Option<Lookup> {
    Some(Lookup::Found(v.to_vec()))
}

fn build_numbered(path: &std::path::Path, count: u32, block_size: usize) {
    let mut builder = SSTableBuilder::new(path, 1, block_size).unwrap();
    for i in 0..count {
        let key = format!("key_{:05}", i);
        let val = format!("val_{:05}", i);
        builder.add(&put(key.as_bytes(), i as u64 + 1), val.as_bytes()).unwrap();
    }
    builder.finish().unwrap();
}

// =============================================================================
// Test 1: Write 1000 entries across many blocks, get all back
// =============================================================================
#[test]
fn read_1000_entries_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    build_numbered(&path, 1000, 256);

    let sstable = SSTable::open(&path).unwrap();
    assert!(sstable.block_count() > 1);
    for i in 0..1000u32 {
        let key = format!("key_{:05}", i);
        let expected = format!("val_{:05}", i);
        assert_eq!(
            sstable.get(key.as_bytes(), u64::MAX).unwrap(),
            found(expected.as_bytes()),
            "Failed for key {}",
            key
        );
    }
}

// =============================================================================
// Test 2: Missing keys → None (between, before, after)
// =============================================================================
#[test]
fn get_nonexistent_key_returns_none() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");

    let mut builder = SSTableBuilder::new(&path, 1, 4096).unwrap();
    builder.add(&put(b"aaa", 1), b"value_aaa").unwrap();
    builder.add(&put(b"ccc", 2), b"value_ccc").unwrap();
    builder.finish().unwrap();

    let sstable = SSTable::open(&path).unwrap();
    assert_eq!(sstable.get(b"bbb", 10).unwrap(), None);
    assert_eq!(sstable.get(b"___", 10).unwrap(), None);
    assert_eq!(sstable.get(b"zzz", 10).unwrap(), None);
}

// =============================================================================
// Test 3: Versions and tombstones are resolved against the snapshot
// =============================================================================
#[test]
fn versions_resolve_by_snapshot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");

    // Tiny blocks so versions of one key straddle block boundaries.
    let mut builder = SSTableBuilder::new(&path, 1, 48).unwrap();
    builder
        .add(&InternalKey::new(b"k".to_vec(), 9, ValueType::Delete), b"")
        .unwrap();
    for seq in [7, 5, 3] {
        builder.add(&put(b"k", seq), format!("v{seq}").as_bytes()).unwrap();
    }
    builder.finish().unwrap();

    let sstable = SSTable::open(&path).unwrap();
    assert_eq!(sstable.get(b"k", 2).unwrap(), None);
    assert_eq!(sstable.get(b"k", 3).unwrap(), found(b"v3"));
    assert_eq!(sstable.get(b"k", 6).unwrap(), found(b"v5"));
    assert_eq!(sstable.get(b"k", 8).unwrap(), found(b"v7"));
    assert_eq!(sstable.get(b"k", 9).unwrap(), Some(Lookup::Deleted));
    assert_eq!(sstable.latest_sequence(b"k").unwrap(), Some(9));
    assert_eq!(sstable.latest_sequence(b"j").unwrap(), None);
}

// =============================================================================
// Test 4: Metadata survives the round trip
// =============================================================================
#[test]
fn meta_returns_correct_info() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000042.sst");

    let mut builder = SSTableBuilder::new(&path, 42, 4096).unwrap().with_level(1);
    builder.add(&put(b"alpha", 3), b"first").unwrap();
    builder.add(&put(b"beta", 8), b"second").unwrap();
    builder.add(&put(b"gamma", 5), b"third").unwrap();
    let expected = builder.finish().unwrap();

    let sstable = SSTable::open(&path).unwrap();
    assert_eq!(sstable.meta(), &expected);
    assert_eq!(expected.level, 1);
    assert_eq!(expected.min_key, b"alpha");
    assert_eq!(expected.max_key, b"gamma");
    assert_eq!((expected.min_sequence, expected.max_sequence), (3, 8));
    assert_eq!(expected.entry_count, 3);
    assert_eq!(expected.file_size, fs::metadata(&path).unwrap().len());
}

// =============================================================================
// Test 5: Cursor walks every entry across blocks and seeks
// =============================================================================
#[test]
fn iterator_walks_and_seeks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    build_numbered(&path, 200, 128);

    let sstable = Arc::new(SSTable::open(&path).unwrap());
    let mut iter = sstable.iter().unwrap();
    let mut count = 0;
    while iter.is_valid() {
        assert_eq!(iter.key(), format!("key_{:05}", count).as_bytes());
        assert_eq!(iter.sequence(), count as u64 + 1);
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, 200);

    iter.seek(b"key_00150").unwrap();
    assert_eq!(iter.value(), b"val_00150");
    iter.seek(b"key_00049x").unwrap();
    assert_eq!(iter.key(), b"key_00050");
    iter.seek(b"zzz").unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 6: Empty value is found, not absent
// =============================================================================
#[test]
fn empty_value_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");

    let mut builder = SSTableBuilder::new(&path, 1, 4096).unwrap();
    builder.add(&put(b"key_with_empty_value", 1), b"").unwrap();
    builder.finish().unwrap();

    let sstable = SSTable::open(&path).unwrap();
    assert_eq!(sstable.get(b"key_with_empty_value", 1).unwrap(), found(b""));
}

// =============================================================================
// Test 7: Garbage and flipped bits are corruption
// =============================================================================
#[test]
fn corrupted_files_are_rejected() {
    let dir = tempdir().unwrap();

    assert!(SSTable::open(&dir.path().join("missing.sst")).is_err());

    let garbage = dir.path().join("garbage.sst");
    fs::write(&garbage, vec![0x5Au8; 200]).unwrap();
    assert!(matches!(SSTable::open(&garbage), Err(Error::Corruption(_))));

    let path = dir.path().join("000001.sst");
    build_numbered(&path, 50, 4096);
    let mut raw = fs::read(&path).unwrap();
    raw[10] ^= 0x40;
    fs::write(&path, &raw).unwrap();
    assert!(matches!(SSTable::open(&path), Err(Error::Corruption(_))));
}

// =============================================================================
// Test 8: An obsolete segment is removed when its last reader goes away
// =============================================================================
#[test]
fn obsolete_file_removed_on_last_drop() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    build_numbered(&path, 10, 4096);

    let sstable = Arc::new(SSTable::open(&path).unwrap());
    let iter = sstable.iter().unwrap();
    sstable.mark_obsolete();
    drop(sstable);
    assert!(path.exists(), "a live cursor keeps the file");
    drop(iter);
    assert!(!path.exists());
}
