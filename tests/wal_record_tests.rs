// WAL record format: one record per committed batch, CRC-protected.

use txkv::types::ValueType;
use txkv::wal::{BatchEntry, WALRecord};

// =============================================================================
// Test 1: Encode and decode Put record
// =============================================================================
#[test]
fn encode_decode_put_record() {
    let record = WALRecord::put(7, b"key".to_vec(), b"value".to_vec());
    let encoded = record.encode();
    let decoded = WALRecord::decode(&encoded).unwrap();

    assert_eq!(decoded.sequence, 7);
    assert_eq!(decoded.entries.len(), 1);
    assert_eq!(decoded.entries[0].value_type, ValueType::Put);
    assert_eq!(decoded.entries[0].key, b"key");
    assert_eq!(decoded.entries[0].value, b"value");
}

// =============================================================================
// Test 2: Encode and decode Delete record
// =============================================================================
#[test]
fn encode_decode_delete_record() {
    let record = WALRecord::delete(3, b"key".to_vec());
    let decoded = WALRecord::decode(&record.encode()).unwrap();

    assert_eq!(decoded.entries[0].value_type, ValueType::Delete);
    assert_eq!(decoded.entries[0].key, b"key");
    assert!(decoded.entries[0].value.is_empty());
}

// =============================================================================
// Test 3: A mixed batch keeps every entry in order under one sequence
// =============================================================================
#[test]
fn batch_keeps_entries_in_order() {
    let record = WALRecord::batch(
        42,
        vec![
            BatchEntry::put(b"a".to_vec(), b"1".to_vec()),
            BatchEntry::delete(b"b".to_vec()),
            BatchEntry::put(b"c".to_vec(), Vec::new()),
        ],
    );
    let decoded = WALRecord::decode(&record.encode()).unwrap();

    assert_eq!(decoded, record);
    assert_eq!(decoded.sequence, 42);
    assert_eq!(decoded.entries[1].value_type, ValueType::Delete);
    assert_eq!(decoded.entries[2].value_type, ValueType::Put);
    assert!(decoded.entries[2].value.is_empty());
}

// =============================================================================
// Test 4: Corrupted payload is detected
// =============================================================================
#[test]
fn corrupted_crc_detected() {
    let record = WALRecord::put(1, b"key".to_vec(), b"value".to_vec());
    let mut encoded = record.encode();

    // Flip a bit in the data (not the CRC itself)
    encoded[10] ^= 0xFF;

    assert!(WALRecord::decode(&encoded).is_err());
}

// =============================================================================
// Test 5: Large key and value have no implicit length limit
// =============================================================================
#[test]
fn large_key_and_value() {
    let key = vec![0xAB; 100_000];
    let value = vec![0xCD; 300_000];

    let record = WALRecord::put(1, key.clone(), value.clone());
    let decoded = WALRecord::decode(&record.encode()).unwrap();

    assert_eq!(decoded.entries[0].key, key);
    assert_eq!(decoded.entries[0].value, value);
}

// =============================================================================
// Test 6: encoded_size matches actual size
// =============================================================================
#[test]
fn encoded_size_matches_actual() {
    let record = WALRecord::batch(
        9,
        vec![
            BatchEntry::put(b"hello".to_vec(), b"world".to_vec()),
            BatchEntry::delete(b"bye".to_vec()),
        ],
    );
    assert_eq!(record.encoded_size(), record.encode().len());
}

// =============================================================================
// Test 7: Truncated record fails decode
// =============================================================================
#[test]
fn truncated_record_fails() {
    let encoded = WALRecord::put(1, b"key".to_vec(), b"value".to_vec()).encode();
    let truncated = &encoded[..encoded.len() / 2];
    assert!(WALRecord::decode(truncated).is_err());
}
