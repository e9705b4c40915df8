use crate::error::{Error, Result};
use crate::types::{SeqNum, ValueType};

/// One mutation inside a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub value_type: ValueType,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl BatchEntry {
    pub fn put(key: Vec<u8>, value: Vec<u8>) -> Self {
        BatchEntry {
            value_type: ValueType::Put,
            key,
            value,
        }
    }

    pub fn delete(key: Vec<u8>) -> Self {
        BatchEntry {
            value_type: ValueType::Delete,
            key,
            value: Vec::new(),
        }
    }

    fn encoded_size(&self) -> usize {
        ENTRY_HEADER_SIZE + self.key.len() + self.value.len()
    }
}

/// A single record in the WAL: every mutation of one committed transaction,
/// sharing one sequence number.
///
/// On-disk format:
/// ```text
/// ┌──────────┬────────┬─────────┬───────────┬──────────────────────────────────────────┐
/// │ CRC (4B) │ Len(4B)│ Seq (8B)│ Count (4B)│ { Type(1B) KeyLen(4B) ValLen(4B) K V } * │
/// └──────────┴────────┴─────────┴───────────┴──────────────────────────────────────────┘
/// ```
///
/// CRC covers everything after the CRC field itself. One record per commit
/// makes recovery all-or-nothing per transaction: a batch torn by a crash
/// fails its CRC and is dropped whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WALRecord {
    pub sequence: SeqNum,
    pub entries: Vec<BatchEntry>,
}

// Header sizes
const CRC_SIZE: usize = 4;
const LEN_SIZE: usize = 4;
const SEQ_SIZE: usize = 8;
const COUNT_SIZE: usize = 4;
const HEADER_SIZE: usize = CRC_SIZE + LEN_SIZE + SEQ_SIZE + COUNT_SIZE;
const ENTRY_HEADER_SIZE: usize = 1 + 4 + 4;

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

impl WALRecord {
    /// Create a record for a whole commit batch.
    pub fn batch(sequence: SeqNum, entries: Vec<BatchEntry>) -> Self {
        WALRecord { sequence, entries }
    }

    /// Create a single-entry Put record.
    pub fn put(sequence: SeqNum, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self::batch(sequence, vec![BatchEntry::put(key, value)])
    }

    /// Create a single-entry Delete record.
    pub fn delete(sequence: SeqNum, key: Vec<u8>) -> Self {
        Self::batch(sequence, vec![BatchEntry::delete(key)])
    }

    /// Serialize this record to bytes (including CRC header).
    pub fn encode(&self) -> Vec<u8> {
        let total_len = self.encoded_size();
        let payload_len = total_len - CRC_SIZE - LEN_SIZE;

        let mut buf = Vec::with_capacity(total_len);

        // Reserve space for CRC (we'll fill it at the end)
        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        buf.extend_from_slice(&(payload_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

        for entry in &self.entries {
            buf.push(entry.value_type as u8);
            buf.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
            buf.extend_from_slice(&(entry.value.len() as u32).to_le_bytes());
            buf.extend_from_slice(&entry.key);
            buf.extend_from_slice(&entry.value);
        }

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[0..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Deserialize a record from bytes. Returns error if CRC doesn't match.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Corruption("record too short".into()));
        }

        let stored_crc = read_u32(data, 0);
        let payload_len = read_u32(data, CRC_SIZE) as usize;

        let total_len = CRC_SIZE + LEN_SIZE + payload_len;
        if payload_len < SEQ_SIZE + COUNT_SIZE || data.len() < total_len {
            return Err(Error::Corruption("record truncated".into()));
        }

        let computed_crc = crc32fast::hash(&data[CRC_SIZE..total_len]);
        if stored_crc != computed_crc {
            return Err(Error::Corruption("CRC mismatch".into()));
        }

        let mut offset = CRC_SIZE + LEN_SIZE;

        let mut seq = [0u8; 8];
        seq.copy_from_slice(&data[offset..offset + SEQ_SIZE]);
        let sequence = u64::from_le_bytes(seq);
        offset += SEQ_SIZE;

        let count = read_u32(data, offset) as usize;
        offset += COUNT_SIZE;

        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            if offset + ENTRY_HEADER_SIZE > total_len {
                return Err(Error::Corruption("entry header exceeds record".into()));
            }
            let value_type = ValueType::from_u8(data[offset])?;
            let key_len = read_u32(data, offset + 1) as usize;
            let val_len = read_u32(data, offset + 5) as usize;
            offset += ENTRY_HEADER_SIZE;

            if offset + key_len + val_len > total_len {
                return Err(Error::Corruption("entry length exceeds record".into()));
            }
            let key = data[offset..offset + key_len].to_vec();
            offset += key_len;
            let value = data[offset..offset + val_len].to_vec();
            offset += val_len;

            entries.push(BatchEntry {
                value_type,
                key,
                value,
            });
        }

        if offset != total_len {
            return Err(Error::Corruption("trailing bytes in record".into()));
        }

        Ok(WALRecord { sequence, entries })
    }

    /// Size of this record when serialized on disk.
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.entries.iter().map(BatchEntry::encoded_size).sum::<usize>()
    }
}
