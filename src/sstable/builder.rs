use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::bloom::BloomFilterBuilder;
use crate::error::Result;
use crate::sstable::block::BlockBuilder;
use crate::sstable::footer::{Footer, IndexEntry, SSTableMeta, SSTABLE_MAGIC};
use crate::types::{InternalKey, SeqNum};

/// Default bloom filter false positive rate for new segments.
pub const DEFAULT_BLOOM_FPR: f64 = 0.01;

/// Builds an SSTable file from a sorted stream of versioned entries.
///
/// Used during:
/// - Memtable flush (sorted memtable → SSTable)
/// - Compaction (merged iterators → new SSTables)
///
/// Build process:
/// 1. Add entries one by one (must be in internal-key order)
/// 2. Entries fill up blocks; when a block is full it's written to disk
/// 3. finish() flushes the last block, writes index, meta, bloom, footer, fsync
pub struct SSTableBuilder {
    /// Current block being filled with entries.
    block_builder: BlockBuilder,
    /// Index entries: one per flushed data block.
    index_entries: Vec<IndexEntry>,
    /// Tracks current write position in the file.
    data_offset: u64,
    /// Buffered file writer.
    writer: BufWriter<File>,
    /// Unique SSTable identifier.
    sst_id: u64,
    level: u32,
    /// Target block size.
    block_size: usize,
    bloom: BloomFilterBuilder,
    /// Smallest user key added (first key, since entries are sorted).
    min_key: Option<Vec<u8>>,
    /// Largest user key added.
    max_key: Option<Vec<u8>>,
    min_sequence: SeqNum,
    max_sequence: SeqNum,
    /// Total entries added.
    entry_count: u64,
    /// Last key added to the current block (needed for index entry).
    last_key_in_block: Option<InternalKey>,
}

impl SSTableBuilder {
    /// Create a new SSTable builder that writes to the given path.
    pub fn new(path: &Path, sst_id: u64, block_size: usize) -> Result<Self> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(SSTableBuilder {
            block_builder: BlockBuilder::new(block_size),
            index_entries: Vec::new(),
            data_offset: 0,
            writer,
            sst_id,
            level: 0,
            block_size,
            bloom: BloomFilterBuilder::new(1024, DEFAULT_BLOOM_FPR),
            min_key: None,
            max_key: None,
            min_sequence: SeqNum::MAX,
            max_sequence: 0,
            entry_count: 0,
            last_key_in_block: None,
        })
    }

    /// Level recorded in the segment's metadata.
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Bloom filter false positive rate. Out-of-range rates are clamped.
    pub fn with_bloom_false_positive_rate(mut self, rate: f64) -> Self {
        self.bloom = BloomFilterBuilder::new(1024, rate);
        self
    }

    /// Add a versioned entry. MUST be called in internal-key order.
    ///
    /// Internally:
    /// 1. Try adding to the current block
    /// 2. If block is full: flush block to file, record index entry, start new block
    /// 3. Add the entry to the new block
    pub fn add(&mut self, key: &InternalKey, value: &[u8]) -> Result<()> {
        if self.max_key.as_deref() != Some(key.user_key.as_slice()) {
            self.bloom.add_key(&key.user_key);
            if self.min_key.is_none() {
                self.min_key = Some(key.user_key.clone());
            }
            self.max_key = Some(key.user_key.clone());
        }
        self.min_sequence = self.min_sequence.min(key.sequence);
        self.max_sequence = self.max_sequence.max(key.sequence);
        self.entry_count += 1;

        if !self.block_builder.add(key, value) {
            // Block is full: flush it, then add to a fresh block.
            // The first entry of a block is always accepted.
            self.flush_block()?;
            self.block_builder.add(key, value);
        }
        self.last_key_in_block = Some(key.clone());

        Ok(())
    }

    /// Number of entries added so far.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Approximate bytes written so far, current block included.
    pub fn estimated_size(&self) -> u64 {
        self.data_offset + self.block_builder.estimated_size() as u64
    }

    /// Write `data` followed by its CRC32, returning the bytes written.
    fn write_block(&mut self, data: &[u8]) -> Result<u64> {
        self.writer.write_all(data)?;
        self.writer.write_all(&crc32fast::hash(data).to_le_bytes())?;
        let written = (data.len() + super::footer::BLOCK_TRAILER_SIZE) as u64;
        self.data_offset += written;
        Ok(written)
    }

    /// Flush the current block to disk and record an index entry.
    fn flush_block(&mut self) -> Result<()> {
        if self.block_builder.is_empty() {
            return Ok(());
        }
        let Some(last_key) = self.last_key_in_block.take() else {
            return Ok(());
        };

        let old_builder =
            std::mem::replace(&mut self.block_builder, BlockBuilder::new(self.block_size));
        let block_data = old_builder.build();

        let offset = self.data_offset;
        let size = self.write_block(&block_data)?;

        self.index_entries.push(IndexEntry {
            last_key,
            offset,
            size,
        });
        Ok(())
    }

    /// Finalize the SSTable: flush last block, write index, meta and bloom
    /// blocks, footer, fsync.
    pub fn finish(mut self) -> Result<SSTableMeta> {
        self.flush_block()?;

        let mut index_data = Vec::new();
        for entry in &self.index_entries {
            index_data.extend_from_slice(&entry.encode());
        }
        let index_block_offset = self.data_offset;
        let index_block_size = self.write_block(&index_data)?;

        let bloom = std::mem::replace(
            &mut self.bloom,
            BloomFilterBuilder::new(0, DEFAULT_BLOOM_FPR),
        )
        .build();

        let mut meta = SSTableMeta {
            id: self.sst_id,
            level: self.level,
            min_key: self.min_key.take().unwrap_or_default(),
            max_key: self.max_key.take().unwrap_or_default(),
            min_sequence: if self.entry_count == 0 { 0 } else { self.min_sequence },
            max_sequence: self.max_sequence,
            file_size: 0,
            entry_count: self.entry_count,
        };
        let meta_block_offset = self.data_offset;
        let meta_block_size = self.write_block(&meta.encode())?;

        let bloom_block_offset = self.data_offset;
        let bloom_block_size = self.write_block(&bloom.serialize())?;

        let footer = Footer {
            index_block_offset,
            index_block_size,
            meta_block_offset,
            meta_block_size,
            bloom_block_offset,
            bloom_block_size,
            magic: SSTABLE_MAGIC,
        };
        self.writer.write_all(&footer.encode())?;

        // Flush buffer + fsync to guarantee durability
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        meta.file_size = self.data_offset + Footer::SIZE as u64;
        Ok(meta)
    }
}
