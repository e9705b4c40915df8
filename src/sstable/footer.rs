use crate::error::{Error, Result};
use crate::types::{InternalKey, SeqNum, ValueType};

/// Magic number to identify SSTable files.
pub const SSTABLE_MAGIC: u64 = 0x5458_4B56_5F53_5354; // "TXKV_SST"

/// Bytes of CRC32 trailing every block (data, index, meta, bloom).
pub const BLOCK_TRAILER_SIZE: usize = 4;

fn take<'a>(data: &'a [u8], offset: &mut usize, len: usize, what: &str) -> Result<&'a [u8]> {
    if data.len() < *offset + len {
        return Err(Error::Corruption(format!("{what} truncated")));
    }
    let slice = &data[*offset..*offset + len];
    *offset += len;
    Ok(slice)
}

fn take_u32(data: &[u8], offset: &mut usize, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(take(data, offset, 4, what)?);
    Ok(u32::from_le_bytes(buf))
}

fn take_u64(data: &[u8], offset: &mut usize, what: &str) -> Result<u64> {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(take(data, offset, 8, what)?);
    Ok(u64::from_le_bytes(buf))
}

/// Metadata about an SSTable file. Persisted in the segment's meta block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTableMeta {
    /// Unique SSTable identifier.
    pub id: u64,
    /// 0 = freshly flushed, 1 = compaction output.
    pub level: u32,
    /// Smallest user key in the SSTable.
    pub min_key: Vec<u8>,
    /// Largest user key in the SSTable.
    pub max_key: Vec<u8>,
    /// Lowest commit sequence stored.
    pub min_sequence: SeqNum,
    /// Highest commit sequence stored.
    pub max_sequence: SeqNum,
    /// File size in bytes. Not stored; filled in from the file on open.
    pub file_size: u64,
    /// Number of entries (including tombstones and older versions).
    pub entry_count: u64,
}

impl SSTableMeta {
    /// Format: [id(8B)][level(4B)][min_seq(8B)][max_seq(8B)][entry_count(8B)]
    ///         [min_key_len(4B)][min_key][max_key_len(4B)][max_key]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(44 + self.min_key.len() + self.max_key.len());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.level.to_le_bytes());
        buf.extend_from_slice(&self.min_sequence.to_le_bytes());
        buf.extend_from_slice(&self.max_sequence.to_le_bytes());
        buf.extend_from_slice(&self.entry_count.to_le_bytes());
        buf.extend_from_slice(&(self.min_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.min_key);
        buf.extend_from_slice(&(self.max_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.max_key);
        buf
    }

    pub fn decode(data: &[u8], file_size: u64) -> Result<Self> {
        let mut offset = 0usize;
        let id = take_u64(data, &mut offset, "meta id")?;
        let level = take_u32(data, &mut offset, "meta level")?;
        let min_sequence = take_u64(data, &mut offset, "meta min_sequence")?;
        let max_sequence = take_u64(data, &mut offset, "meta max_sequence")?;
        let entry_count = take_u64(data, &mut offset, "meta entry_count")?;
        let min_len = take_u32(data, &mut offset, "meta min_key_len")? as usize;
        let min_key = take(data, &mut offset, min_len, "meta min_key")?.to_vec();
        let max_len = take_u32(data, &mut offset, "meta max_key_len")? as usize;
        let max_key = take(data, &mut offset, max_len, "meta max_key")?.to_vec();

        Ok(SSTableMeta {
            id,
            level,
            min_key,
            max_key,
            min_sequence,
            max_sequence,
            file_size,
            entry_count,
        })
    }
}

/// An entry in the SSTable's index block.
/// Maps a block's last internal key to its location in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Last (largest) internal key in the block.
    pub last_key: InternalKey,
    /// Byte offset of the block in the file.
    pub offset: u64,
    /// Size of the block in bytes, CRC trailer included.
    pub size: u64,
}

impl IndexEntry {
    /// Encode this index entry to bytes.
    /// Format: [key_len(4B)][key][seq(8B)][type(1B)][offset(8B)][size(8B)]
    pub fn encode(&self) -> Vec<u8> {
        let key = &self.last_key.user_key;
        let mut buf = Vec::with_capacity(4 + key.len() + 25);
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&self.last_key.sequence.to_le_bytes());
        buf.push(self.last_key.value_type as u8);
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Decode an index entry from bytes, returning (entry, bytes_consumed).
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0usize;
        let key_len = take_u32(data, &mut offset, "index entry")? as usize;
        let user_key = take(data, &mut offset, key_len, "index entry key")?.to_vec();
        let sequence = take_u64(data, &mut offset, "index entry sequence")?;
        let value_type = ValueType::from_u8(take(data, &mut offset, 1, "index entry type")?[0])?;
        let block_offset = take_u64(data, &mut offset, "index entry offset")?;
        let size = take_u64(data, &mut offset, "index entry size")?;
        Ok((
            IndexEntry {
                last_key: InternalKey::new(user_key, sequence, value_type),
                offset: block_offset,
                size,
            },
            offset,
        ))
    }
}

/// The footer sits at the end of the SSTable file.
/// It tells the reader where to find the index, meta and bloom blocks.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Index block offset (8B)              │
/// │ Index block size (8B)                │
/// │ Meta block offset (8B)               │
/// │ Meta block size (8B)                 │
/// │ Bloom block offset (8B)              │
/// │ Bloom block size (8B)                │
/// │ Magic number (8B)                    │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub index_block_offset: u64,
    pub index_block_size: u64,
    pub meta_block_offset: u64,
    pub meta_block_size: u64,
    pub bloom_block_offset: u64,
    pub bloom_block_size: u64,
    pub magic: u64,
}

impl Footer {
    /// Size of the footer in bytes (fixed).
    pub const SIZE: usize = 8 * 7;

    /// Encode footer to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.index_block_offset.to_le_bytes());
        buf.extend_from_slice(&self.index_block_size.to_le_bytes());
        buf.extend_from_slice(&self.meta_block_offset.to_le_bytes());
        buf.extend_from_slice(&self.meta_block_size.to_le_bytes());
        buf.extend_from_slice(&self.bloom_block_offset.to_le_bytes());
        buf.extend_from_slice(&self.bloom_block_size.to_le_bytes());
        buf.extend_from_slice(&self.magic.to_le_bytes());
        buf
    }

    /// Decode footer from bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("footer too short".into()));
        }
        let mut offset = 0usize;
        let footer = Footer {
            index_block_offset: take_u64(data, &mut offset, "footer")?,
            index_block_size: take_u64(data, &mut offset, "footer")?,
            meta_block_offset: take_u64(data, &mut offset, "footer")?,
            meta_block_size: take_u64(data, &mut offset, "footer")?,
            bloom_block_offset: take_u64(data, &mut offset, "footer")?,
            bloom_block_size: take_u64(data, &mut offset, "footer")?,
            magic: take_u64(data, &mut offset, "footer")?,
        };

        if footer.magic != SSTABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic: expected {:#x}, got {:#x}",
                SSTABLE_MAGIC, footer.magic
            )));
        }

        Ok(footer)
    }
}
