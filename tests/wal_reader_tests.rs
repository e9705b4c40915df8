// Reading WAL files back for crash recovery.

use std::io::Write;

use txkv::wal::reader::WALReader;
use txkv::wal::{SyncPolicy, WALRecord, WALWriter};

fn record(i: usize) -> WALRecord {
    WALRecord::put(
        i as u64 + 1,
        format!("key{}", i).into_bytes(),
        format!("val{}", i).into_bytes(),
    )
}

/// Helper: write N put records to a WAL file, return the path.
fn write_test_wal(dir: &tempfile::TempDir, count: usize) -> std::path::PathBuf {
    let path = dir.path().join("000001.wal");
    let mut writer = WALWriter::new(&path, SyncPolicy::EveryWrite).unwrap();
    for i in 0..count {
        writer.append(&record(i)).unwrap();
    }
    writer.sync().unwrap();
    path
}

// =============================================================================
// Test 1: Write 5 records, read all 5 back
// =============================================================================
#[test]
fn read_all_records_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_test_wal(&dir, 5);

    let reader = WALReader::new(&path).unwrap();
    let records: Vec<WALRecord> = reader.iter().map(|r| r.unwrap()).collect();

    assert_eq!(records.len(), 5);
    for (i, rec) in records.iter().enumerate() {
        assert_eq!(rec, &record(i));
    }
}

// =============================================================================
// Test 2: Truncate file mid-record → yields first 4, stops at 5th
// =============================================================================
#[test]
fn truncated_last_record_yields_preceding() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_test_wal(&dir, 5);

    // Chop off last few bytes to simulate crash mid-write
    let file_len = std::fs::metadata(&path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(file_len - 3).unwrap();

    let reader = WALReader::new(&path).unwrap();
    let mut iter = reader.iter();
    let records: Vec<WALRecord> = iter.by_ref().map(|r| r.unwrap()).collect();

    assert_eq!(records.len(), 4);
    assert!(iter.offset() < reader.len(), "torn tail must be detectable");
    for (i, rec) in records.iter().enumerate() {
        assert_eq!(rec.entries[0].key, format!("key{}", i).as_bytes());
    }
}

// =============================================================================
// Test 3: Corrupt CRC of record 3 → yields records 1-2, stops
// =============================================================================
#[test]
fn corrupt_crc_stops_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_test_wal(&dir, 5);

    let offset_of_record_2: usize = (0..2).map(|i| record(i).encoded_size()).sum();

    let mut raw = std::fs::read(&path).unwrap();
    raw[offset_of_record_2] ^= 0x01;
    std::fs::write(&path, &raw).unwrap();

    let reader = WALReader::new(&path).unwrap();
    let records: Vec<WALRecord> = reader.iter().map(|r| r.unwrap()).collect();

    assert_eq!(records.len(), 2);
    assert_eq!(records[1], record(1));
}

// =============================================================================
// Test 4: Empty WAL file → iterator immediately exhausted
// =============================================================================
#[test]
fn empty_wal_yields_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.wal");
    std::fs::File::create(&path).unwrap();

    let reader = WALReader::new(&path).unwrap();
    assert!(reader.is_empty());
    assert_eq!(reader.iter().count(), 0);
}

// =============================================================================
// Test 5: Partial first record → yields nothing
// =============================================================================
#[test]
fn partial_first_record_yields_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.wal");

    // Write just 3 bytes, not even a complete header
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&[0xDE, 0xAD, 0x00]).unwrap();
    file.sync_all().unwrap();

    let reader = WALReader::new(&path).unwrap();
    assert_eq!(reader.iter().count(), 0);
}

// =============================================================================
// Test 6: Multi-entry batches come back whole, tombstones included
// =============================================================================
#[test]
fn batch_records_read_back_whole() {
    use txkv::BatchEntry;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("000002.wal");
    let batch = WALRecord::batch(
        7,
        vec![
            BatchEntry::put(b"a".to_vec(), Vec::new()),
            BatchEntry::delete(b"b".to_vec()),
            BatchEntry::put(b"c".to_vec(), b"3".to_vec()),
        ],
    );
    {
        let mut writer = WALWriter::new(&path, SyncPolicy::EveryWrite).unwrap();
        writer.append(&batch).unwrap();
        writer.append(&record(7)).unwrap();
    }

    let reader = WALReader::new(&path).unwrap();
    let records: Vec<WALRecord> = reader.iter().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], batch);
    assert_eq!(records[0].entries.len(), 3);
    assert!(records[0].entries[1].value_type.is_delete());
    assert_eq!(records[1].sequence, 8);
}
