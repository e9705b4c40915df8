use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::iterator::{StorageIterator, VersionedIterator};
use crate::sstable::block::{ENTRY_HEADER_SIZE, OFFSET_SIZE};
use crate::types::{cmp_internal, InternalKey, Lookup, MAX_SEQUENCE, SeqNum, ValueType};

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(buf)
}

/// One decoded entry, borrowing from its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry<'a> {
    pub key: &'a [u8],
    pub sequence: SeqNum,
    pub value_type: ValueType,
    pub value: &'a [u8],
}

/// A decoded data block. Every entry's bounds are validated by
/// [`Block::decode`], so accessors never read out of range.
pub struct Block {
    data: Vec<u8>,
    offsets: Vec<u32>,
}

impl Block {
    /// Parse a block produced by `BlockBuilder::build`.
    pub fn decode(data: Vec<u8>) -> Result<Self> {
        if data.len() < OFFSET_SIZE {
            return Err(Error::Corruption("block too short".into()));
        }
        let count = read_u32(&data, data.len() - OFFSET_SIZE) as usize;
        let offsets_start = data
            .len()
            .checked_sub(OFFSET_SIZE + count * OFFSET_SIZE)
            .ok_or_else(|| Error::Corruption("block offset array overflows".into()))?;

        let offsets: Vec<u32> = (0..count)
            .map(|i| read_u32(&data, offsets_start + i * OFFSET_SIZE))
            .collect();

        for &offset in &offsets {
            let offset = offset as usize;
            if offset + ENTRY_HEADER_SIZE > offsets_start {
                return Err(Error::Corruption("block entry header out of range".into()));
            }
            let key_len = read_u32(&data, offset) as usize;
            let val_len = read_u32(&data, offset + 4) as usize;
            if offset + ENTRY_HEADER_SIZE + key_len + val_len > offsets_start {
                return Err(Error::Corruption("block entry out of range".into()));
            }
            ValueType::from_u8(data[offset + 16])?;
        }

        Ok(Block { data, offsets })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Entry at position `idx` (must be < len()).
    pub fn entry(&self, idx: usize) -> BlockEntry<'_> {
        let offset = self.offsets[idx] as usize;
        let key_len = read_u32(&self.data, offset) as usize;
        let val_len = read_u32(&self.data, offset + 4) as usize;
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&self.data[offset + 8..offset + 16]);
        let value_type = match self.data[offset + 16] {
            0x02 => ValueType::Delete,
            _ => ValueType::Put,
        };
        let key_start = offset + ENTRY_HEADER_SIZE;
        let val_start = key_start + key_len;
        BlockEntry {
            key: &self.data[key_start..val_start],
            sequence: u64::from_le_bytes(seq),
            value_type,
            value: &self.data[val_start..val_start + val_len],
        }
    }

    /// Position of the first entry >= `target` in internal-key order
    /// (`len()` if none).
    pub fn seek(&self, target: &InternalKey) -> usize {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.entry(mid);
            let ord = cmp_internal(entry.key, entry.sequence, &target.user_key, target.sequence)
                .then_with(|| entry.value_type.cmp(&target.value_type));
            if ord == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Newest version of `key` with `sequence <= snapshot` in this block.
    pub fn get(&self, key: &[u8], snapshot: SeqNum) -> Option<Lookup> {
        let pos = self.seek(&InternalKey::seek_target(key, snapshot));
        if pos >= self.len() {
            return None;
        }
        let entry = self.entry(pos);
        if entry.key != key {
            return None;
        }
        Some(match entry.value_type {
            ValueType::Put => Lookup::Found(entry.value.to_vec()),
            ValueType::Delete => Lookup::Deleted,
        })
    }

    /// Iterate all entries of the block in order.
    pub fn iter(&self) -> BlockIterator<'_> {
        BlockIterator { block: self, pos: 0 }
    }
}

/// Cursor over one block.
pub struct BlockIterator<'a> {
    block: &'a Block,
    pos: usize,
}

impl StorageIterator for BlockIterator<'_> {
    fn key(&self) -> &[u8] {
        self.block.entry(self.pos).key
    }

    fn value(&self) -> &[u8] {
        self.block.entry(self.pos).value
    }

    fn is_valid(&self) -> bool {
        self.pos < self.block.len()
    }

    fn next(&mut self) -> Result<()> {
        if self.is_valid() {
            self.pos += 1;
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.pos = self.block.seek(&InternalKey::seek_target(key, MAX_SEQUENCE));
        Ok(())
    }
}

impl VersionedIterator for BlockIterator<'_> {
    fn sequence(&self) -> SeqNum {
        self.block.entry(self.pos).sequence
    }

    fn value_type(&self) -> ValueType {
        self.block.entry(self.pos).value_type
    }
}
