// Durability: reopen, crash recovery, torn WAL tails and on-disk corruption.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use txkv::db::recovery::replay_wal;
use txkv::memtable::MemTable;
use txkv::wal::{WALRecord, WALWriter};
use txkv::{DB, Error, Options, SyncPolicy};

fn options() -> Options {
    Options::default().with_background_work(false)
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|e| e == ext))
        .collect();
    files.sort();
    files
}

fn flip_byte(path: &Path, at: usize) {
    let mut data = fs::read(path).unwrap();
    data[at] ^= 0x01;
    fs::write(path, data).unwrap();
}

// =============================================================================
// Test 1: Clean close and reopen
// =============================================================================
#[test]
fn reopen_after_close() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = DB::open(dir.path(), options()).unwrap();
        db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        db.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        db.delete(b"a".to_vec()).unwrap();
        db.close().unwrap();
    }

    let db = DB::open(dir.path(), options()).unwrap();
    assert_eq!(db.get(b"a").unwrap(), None);
    assert_eq!(db.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(db.last_sequence(), 3);
    assert_eq!(db.put(b"c".to_vec(), Vec::new()).unwrap(), 4);
}

// =============================================================================
// Test 2: Dropping the last handle shuts down cleanly
// =============================================================================
#[test]
fn drop_flushes_memtable() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = DB::open(dir.path(), options()).unwrap();
        db.put(b"k".to_vec(), b"v".to_vec()).unwrap();
    }
    assert_eq!(files_with_extension(dir.path(), "sst").len(), 1);

    let db = DB::open(dir.path(), options()).unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
}

// =============================================================================
// Test 3: Acknowledged commits survive a crash
// =============================================================================
#[test]
fn crash_recovers_from_wal() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = DB::open(dir.path(), options()).unwrap();
        for i in 0..100u32 {
            let mut tx = db.begin();
            tx.put(format!("k{i:03}").into_bytes(), i.to_le_bytes().to_vec()).unwrap();
            tx.commit().unwrap();
        }
        db.delete(b"k007".to_vec()).unwrap();
        // Crash: no close, no drop.
        std::mem::forget(db);
    }
    assert!(files_with_extension(dir.path(), "sst").is_empty());

    let db = DB::open(dir.path(), options()).unwrap();
    assert_eq!(db.last_sequence(), 101);
    assert_eq!(db.get(b"k000").unwrap(), Some(0u32.to_le_bytes().to_vec()));
    assert_eq!(db.get(b"k099").unwrap(), Some(99u32.to_le_bytes().to_vec()));
    assert_eq!(db.get(b"k007").unwrap(), None);

    // Recovered data now lives in a segment; the old WAL is gone.
    assert_eq!(db.stats().segments, 1);
    assert_eq!(files_with_extension(dir.path(), "wal").len(), 1);
}

// =============================================================================
// Test 4: Crash after a flush replays only the unflushed suffix
// =============================================================================
#[test]
fn crash_after_flush() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = DB::open(dir.path(), options()).unwrap();
        db.put(b"flushed".to_vec(), b"1".to_vec()).unwrap();
        db.flush().unwrap();
        db.put(b"logged".to_vec(), b"2".to_vec()).unwrap();
        db.put(b"flushed".to_vec(), b"3".to_vec()).unwrap();
        std::mem::forget(db);
    }

    let db = DB::open(dir.path(), options()).unwrap();
    assert_eq!(db.last_sequence(), 3);
    assert_eq!(db.get(b"flushed").unwrap(), Some(b"3".to_vec()));
    assert_eq!(db.get(b"logged").unwrap(), Some(b"2".to_vec()));
}

// =============================================================================
// Test 5: A partially written record at the WAL tail is discarded
// =============================================================================
#[test]
fn torn_wal_tail_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = DB::open(dir.path(), options()).unwrap();
        db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        db.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        std::mem::forget(db);
    }

    let wals = files_with_extension(dir.path(), "wal");
    assert_eq!(wals.len(), 1);
    let full = WALRecord::put(3, b"c".to_vec(), b"3".to_vec()).encode();
    let mut file = OpenOptions::new().append(true).open(&wals[0]).unwrap();
    file.write_all(&full[..full.len() / 2]).unwrap();
    drop(file);

    let db = DB::open(dir.path(), options()).unwrap();
    assert_eq!(db.last_sequence(), 2);
    assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(db.get(b"c").unwrap(), None);
    assert_eq!(db.put(b"c".to_vec(), b"new".to_vec()).unwrap(), 3);
}

// =============================================================================
// Test 6: A damaged manifest refuses to open
// =============================================================================
#[test]
fn manifest_corruption_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = DB::open(dir.path(), options()).unwrap();
        db.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        db.close().unwrap();
    }
    let manifest = dir.path().join(txkv::manifest::MANIFEST_FILE);
    let len = fs::metadata(&manifest).unwrap().len() as usize;
    flip_byte(&manifest, len - 1);

    assert!(matches!(DB::open(dir.path(), options()), Err(Error::Corruption(_))));
}

// =============================================================================
// Test 7: A damaged segment refuses to open
// =============================================================================
#[test]
fn segment_corruption_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = DB::open(dir.path(), options()).unwrap();
        for i in 0..10u32 {
            db.put(format!("k{i}").into_bytes(), b"value".to_vec()).unwrap();
        }
        db.close().unwrap();
    }
    let segments = files_with_extension(dir.path(), "sst");
    assert_eq!(segments.len(), 1);
    flip_byte(&segments[0], 10);

    assert!(matches!(DB::open(dir.path(), options()), Err(Error::Corruption(_))));
}

// =============================================================================
// Test 8: A listed segment that vanished is corruption, not data loss
// =============================================================================
#[test]
fn missing_segment_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = DB::open(dir.path(), options()).unwrap();
        db.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        db.close().unwrap();
    }
    for segment in files_with_extension(dir.path(), "sst") {
        fs::remove_file(segment).unwrap();
    }

    assert!(matches!(DB::open(dir.path(), options()), Err(Error::Corruption(_))));
}

// =============================================================================
// Test 9: Segment files missing from the manifest are removed on open
// =============================================================================
#[test]
fn orphan_segment_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = DB::open(dir.path(), options()).unwrap();
        db.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        db.close().unwrap();
    }
    let orphan = dir.path().join("000777.sst");
    fs::write(&orphan, b"half-written compaction output").unwrap();

    let db = DB::open(dir.path(), options()).unwrap();
    assert!(!orphan.exists());
    assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));

    // New files never reuse the orphan's id range.
    db.put(b"k2".to_vec(), b"v2".to_vec()).unwrap();
    db.flush().unwrap();
    assert!(!orphan.exists());
    assert_eq!(db.get(b"k2").unwrap(), Some(b"v2".to_vec()));
}

// =============================================================================
// Test 10: Sequence numbers keep increasing across many restarts
// =============================================================================
#[test]
fn sequence_survives_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let mut expected = 0;
    for round in 0..4u32 {
        let db = DB::open(dir.path(), options()).unwrap();
        assert_eq!(db.last_sequence(), expected);
        for _ in 0..3 {
            expected = db.put(b"round".to_vec(), round.to_le_bytes().to_vec()).unwrap();
        }
        if round % 2 == 0 {
            db.close().unwrap();
        } else {
            std::mem::forget(db);
        }
    }
    let db = DB::open(dir.path(), options()).unwrap();
    assert_eq!(db.last_sequence(), 12);
    assert_eq!(db.get(b"round").unwrap(), Some(3u32.to_le_bytes().to_vec()));
}

// =============================================================================
// Test 11: Replaying a WAL twice leaves the same visible state
// =============================================================================
#[test]
fn replay_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("000001.wal");
    {
        let mut writer = WALWriter::new(&path, SyncPolicy::EveryWrite).unwrap();
        writer.append(&WALRecord::put(1, b"a".to_vec(), b"1".to_vec())).unwrap();
        writer.append(&WALRecord::put(2, b"a".to_vec(), b"2".to_vec())).unwrap();
        writer.append(&WALRecord::delete(3, b"b".to_vec())).unwrap();
    }

    let memtable = MemTable::new(0, usize::MAX);
    let first = replay_wal(&path, &memtable, 0).unwrap();
    let len = memtable.len();
    let second = replay_wal(&path, &memtable, 0).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.applied, 3);
    assert_eq!(memtable.len(), len);
    assert_eq!(memtable.get(b"a", 3).and_then(|l| l.into_value()), Some(b"2".to_vec()));
    assert_eq!(memtable.get(b"a", 1).and_then(|l| l.into_value()), Some(b"1".to_vec()));
    assert_eq!(memtable.max_sequence(), 3);
}
