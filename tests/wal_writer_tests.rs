// Writing WAL records: offsets, sync policies and rotation.

use txkv::wal::reader::WALReader;
use txkv::wal::writer::{list_wals, wal_path};
use txkv::wal::{SyncPolicy, WALManager, WALRecord, WALWriter};

fn make_record(i: usize) -> WALRecord {
    WALRecord::put(
        i as u64 + 1,
        format!("key{}", i).into_bytes(),
        format!("val{}", i).into_bytes(),
    )
}

fn read_all(path: &std::path::Path) -> Vec<WALRecord> {
    let reader = WALReader::new(path).unwrap();
    reader.iter().map(|r| r.unwrap()).collect()
}

// =============================================================================
// Test 1: Records survive reopen in append order
// =============================================================================
#[test]
fn write_multiple_records_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("000001.wal");

    {
        let mut writer = WALWriter::new(&path, SyncPolicy::EveryWrite).unwrap();
        for i in 0..5 {
            writer.append(&make_record(i)).unwrap();
        }
    }

    let records = read_all(&path);
    assert_eq!(records.len(), 5);
    for (i, rec) in records.iter().enumerate() {
        assert_eq!(rec, &make_record(i));
    }
}

// =============================================================================
// Test 2: Offset tracking matches expected size, also across reopen
// =============================================================================
#[test]
fn offset_tracks_bytes_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("000001.wal");

    let expected = make_record(0).encoded_size() as u64;
    {
        let mut writer = WALWriter::new(&path, SyncPolicy::EveryWrite).unwrap();
        assert_eq!(writer.offset(), 0);
        writer.append(&make_record(0)).unwrap();
        assert_eq!(writer.offset(), expected);
    }

    let writer = WALWriter::new(&path, SyncPolicy::EveryWrite).unwrap();
    assert_eq!(writer.offset(), expected, "reopen appends after existing data");
}

// =============================================================================
// Test 3: EveryWrite: counter resets after every append
// =============================================================================
#[test]
fn every_write_syncs_after_each_append() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = WALWriter::new(&dir.path().join("a.wal"), SyncPolicy::EveryWrite).unwrap();

    for i in 0..3 {
        writer.append(&make_record(i)).unwrap();
        assert_eq!(writer.writes_since_sync(), 0, "should reset after every write");
    }
}

// =============================================================================
// Test 4: EveryNWrites(3): counter accumulates, resets on 3rd write
// =============================================================================
#[test]
fn every_n_writes_syncs_after_nth_append() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer =
        WALWriter::new(&dir.path().join("a.wal"), SyncPolicy::EveryNWrites(3)).unwrap();

    writer.append(&make_record(0)).unwrap();
    assert_eq!(writer.writes_since_sync(), 1, "no sync yet");
    writer.append(&make_record(1)).unwrap();
    assert_eq!(writer.writes_since_sync(), 2, "no sync yet");
    writer.append(&make_record(2)).unwrap();
    assert_eq!(writer.writes_since_sync(), 0, "should reset after 3rd write");
    writer.append(&make_record(3)).unwrap();
    assert_eq!(writer.writes_since_sync(), 1, "new batch started");
}

// =============================================================================
// Test 5: EveryNMillis: a long window defers, a zero window always syncs
// =============================================================================
#[test]
fn every_n_millis_syncs_by_elapsed_time() {
    let dir = tempfile::tempdir().unwrap();

    let mut lazy =
        WALWriter::new(&dir.path().join("a.wal"), SyncPolicy::EveryNMillis(60_000)).unwrap();
    lazy.append(&make_record(0)).unwrap();
    lazy.append(&make_record(1)).unwrap();
    assert_eq!(lazy.writes_since_sync(), 2);

    let mut eager = WALWriter::new(&dir.path().join("b.wal"), SyncPolicy::EveryNMillis(0)).unwrap();
    eager.append(&make_record(0)).unwrap();
    assert_eq!(eager.writes_since_sync(), 0);
}

// =============================================================================
// Test 6: All policies produce readable WAL files
// =============================================================================
#[test]
fn all_policies_produce_readable_files() {
    let policies = [
        SyncPolicy::EveryWrite,
        SyncPolicy::EveryNWrites(2),
        SyncPolicy::EveryNMillis(1000),
    ];

    for (idx, policy) in policies.into_iter().enumerate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("test_{}.wal", idx));
        {
            let mut writer = WALWriter::new(&path, policy).unwrap();
            for i in 0..5 {
                writer.append(&make_record(i)).unwrap();
            }
        }
        assert_eq!(read_all(&path).len(), 5, "policy {:?} should produce 5 records", policy);
    }
}

// =============================================================================
// Test 7: Rotation moves writes to the new file, old file kept until deleted
// =============================================================================
#[test]
fn writes_go_to_new_wal_after_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = WALManager::new(dir.path(), 1, SyncPolicy::EveryWrite).unwrap();
    assert_eq!(manager.active_id(), 1);

    manager.active_writer().append(&make_record(0)).unwrap();
    let old_path = manager.rotate(2).unwrap();
    assert_eq!(old_path, wal_path(dir.path(), 1));
    assert_eq!(manager.active_id(), 2);
    manager.active_writer().append(&make_record(1)).unwrap();

    assert_eq!(read_all(&old_path), vec![make_record(0)]);
    assert_eq!(read_all(manager.active_path()), vec![make_record(1)]);

    let ids: Vec<u64> = list_wals(dir.path()).unwrap().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec![1, 2]);

    WALManager::delete_wal(&old_path).unwrap();
    assert!(!old_path.exists());
    // Deleting twice is fine.
    WALManager::delete_wal(&old_path).unwrap();
}
