use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bloom::BloomFilter;
use crate::error::{Error, Result};
use crate::sstable::block::Block;
use crate::sstable::footer::{BLOCK_TRAILER_SIZE, Footer, IndexEntry, SSTableMeta};
use crate::sstable::iterator::SSTableIterator;
use crate::types::{InternalKey, Lookup, MAX_SEQUENCE, SeqNum};

/// An opened SSTable file. Supports point lookups and range scans.
///
/// On open:
/// 1. Read footer (last N bytes) → find index, meta and bloom positions
/// 2. Read, checksum and parse the index, meta and bloom blocks
/// 3. Ready for queries (data blocks read on demand)
///
/// Shared between readers via `Arc`. Once compaction has replaced the
/// segment it is marked obsolete, and the file is removed when the last
/// reference goes away.
pub struct SSTable {
    path: PathBuf,
    /// Open file handle for reading data blocks.
    file: Mutex<File>,
    /// Index entries parsed from the index block.
    /// Each entry maps a block's last internal key to its file location.
    index: Vec<IndexEntry>,
    meta: SSTableMeta,
    bloom: BloomFilter,
    obsolete: AtomicBool,
}

fn read_exact_at(file: &mut File, offset: u64, size: u64) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Strip and verify the CRC32 trailer of a block.
fn verify_block(mut raw: Vec<u8>, what: &str) -> Result<Vec<u8>> {
    if raw.len() < BLOCK_TRAILER_SIZE {
        return Err(Error::Corruption(format!("{what} block too short")));
    }
    let split = raw.len() - BLOCK_TRAILER_SIZE;
    let mut stored = [0u8; 4];
    stored.copy_from_slice(&raw[split..]);
    raw.truncate(split);
    if crc32fast::hash(&raw) != u32::from_le_bytes(stored) {
        return Err(Error::Corruption(format!("{what} block CRC mismatch")));
    }
    Ok(raw)
}

impl SSTable {
    /// Open an SSTable file, checksumming every block.
    ///
    /// Any structural or checksum failure is reported as
    /// [`Error::Corruption`].
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;

        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(Error::Corruption(format!(
                "{}: file too short to contain footer",
                path.display()
            )));
        }

        let footer_buf = read_exact_at(&mut file, file_size - Footer::SIZE as u64, Footer::SIZE as u64)?;
        let footer = Footer::decode(&footer_buf)?;

        let body_end = file_size - Footer::SIZE as u64;
        for (offset, size) in [
            (footer.index_block_offset, footer.index_block_size),
            (footer.meta_block_offset, footer.meta_block_size),
            (footer.bloom_block_offset, footer.bloom_block_size),
        ] {
            if offset.checked_add(size).is_none_or(|end| end > body_end) {
                return Err(Error::Corruption(format!(
                    "{}: block handle out of range",
                    path.display()
                )));
            }
        }

        let index_buf = verify_block(
            read_exact_at(&mut file, footer.index_block_offset, footer.index_block_size)?,
            "index",
        )?;
        let mut index = Vec::new();
        let mut offset = 0usize;
        while offset < index_buf.len() {
            let (entry, consumed) = IndexEntry::decode(&index_buf[offset..])?;
            if entry.offset.checked_add(entry.size).is_none_or(|end| end > footer.index_block_offset) {
                return Err(Error::Corruption("data block handle out of range".into()));
            }
            index.push(entry);
            offset += consumed;
        }

        for entry in &index {
            verify_block(read_exact_at(&mut file, entry.offset, entry.size)?, "data")?;
        }

        let meta_buf = verify_block(
            read_exact_at(&mut file, footer.meta_block_offset, footer.meta_block_size)?,
            "meta",
        )?;
        let meta = SSTableMeta::decode(&meta_buf, file_size)?;

        let bloom_buf = verify_block(
            read_exact_at(&mut file, footer.bloom_block_offset, footer.bloom_block_size)?,
            "bloom",
        )?;
        let bloom = BloomFilter::deserialize(&bloom_buf)?;

        debug!(path = %path.display(), id = meta.id, entries = meta.entry_count, "opened segment");

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index,
            meta,
            bloom,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Read, checksum and decode data block `idx`.
    pub(crate) fn read_block(&self, idx: usize) -> Result<Block> {
        let entry = &self.index[idx];
        let raw = {
            let mut file = self.file.lock();
            read_exact_at(&mut file, entry.offset, entry.size)?
        };
        Block::decode(verify_block(raw, "data")?)
    }

    /// Index of the first data block that may hold an entry >= `target`.
    pub(crate) fn find_block(&self, target: &InternalKey) -> usize {
        self.index.partition_point(|entry| entry.last_key < *target)
    }

    /// Number of data blocks.
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Point lookup: newest version of `key` with `sequence <= snapshot`.
    ///
    /// Algorithm:
    /// 1. Check if key is outside [min_key, max_key] range → return None
    /// 2. Ask the bloom filter → definitely absent means None
    /// 3. Binary search index → find the right data block
    /// 4. Read that block from disk and binary search within it
    pub fn get(&self, key: &[u8], snapshot: SeqNum) -> Result<Option<Lookup>> {
        if self.meta.entry_count == 0
            || key < self.meta.min_key.as_slice()
            || key > self.meta.max_key.as_slice()
            || snapshot < self.meta.min_sequence
        {
            return Ok(None);
        }
        if !self.bloom.may_contain(key) {
            return Ok(None);
        }

        let block_idx = self.find_block(&InternalKey::seek_target(key, snapshot));
        if block_idx >= self.index.len() {
            return Ok(None);
        }
        Ok(self.read_block(block_idx)?.get(key, snapshot))
    }

    /// Sequence of the newest stored version of `key`, tombstones included.
    pub fn latest_sequence(&self, key: &[u8]) -> Result<Option<SeqNum>> {
        if self.meta.entry_count == 0
            || key < self.meta.min_key.as_slice()
            || key > self.meta.max_key.as_slice()
            || !self.bloom.may_contain(key)
        {
            return Ok(None);
        }
        let target = InternalKey::seek_target(key, MAX_SEQUENCE);
        let block_idx = self.find_block(&target);
        if block_idx >= self.index.len() {
            return Ok(None);
        }
        let block = self.read_block(block_idx)?;
        let pos = block.seek(&target);
        if pos >= block.len() {
            return Ok(None);
        }
        let entry = block.entry(pos);
        Ok((entry.key == key).then_some(entry.sequence))
    }

    /// Create an iterator over all entries in the SSTable.
    pub fn iter(self: &Arc<Self>) -> Result<SSTableIterator> {
        SSTableIterator::new(Arc::clone(self))
    }

    /// Get metadata about this SSTable.
    pub fn meta(&self) -> &SSTableMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schedule the file for deletion once the last reader drops it.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }
}

impl Drop for SSTable {
    fn drop(&mut self) {
        if self.obsolete.load(Ordering::Acquire) {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove obsolete segment");
            } else {
                debug!(path = %self.path.display(), "removed obsolete segment");
            }
        }
    }
}
