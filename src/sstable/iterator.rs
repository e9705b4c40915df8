use std::sync::Arc;

use crate::error::Result;
use crate::iterator::{StorageIterator, VersionedIterator};
use crate::sstable::block::Block;
use crate::sstable::reader::SSTable;
use crate::types::{InternalKey, MAX_SEQUENCE, SeqNum, ValueType};

/// Cursor over every entry of one SSTable, loading data blocks lazily.
///
/// A seek that lands in the block already loaded reuses it instead of
/// reading the file again.
pub struct SSTableIterator {
    table: Arc<SSTable>,
    block_idx: usize,
    block: Option<Block>,
    pos: usize,
}

impl SSTableIterator {
    /// Position at the first entry of the table.
    pub fn new(table: Arc<SSTable>) -> Result<Self> {
        let mut iter = SSTableIterator {
            table,
            block_idx: 0,
            block: None,
            pos: 0,
        };
        iter.load_block(0)?;
        iter.skip_exhausted_blocks()?;
        Ok(iter)
    }

    fn load_block(&mut self, idx: usize) -> Result<()> {
        let loaded = self.block.is_some() && self.block_idx == idx;
        self.block_idx = idx;
        self.pos = 0;
        if !loaded {
            self.block = if idx < self.table.block_count() {
                Some(self.table.read_block(idx)?)
            } else {
                None
            };
        }
        Ok(())
    }

    /// Move to the following blocks while the current one is exhausted.
    fn skip_exhausted_blocks(&mut self) -> Result<()> {
        while let Some(block) = &self.block {
            if self.pos < block.len() {
                break;
            }
            let next = self.block_idx + 1;
            self.load_block(next)?;
        }
        Ok(())
    }

    fn current(&self) -> &Block {
        self.block.as_ref().expect("iterator is not valid")
    }

    pub fn table(&self) -> &Arc<SSTable> {
        &self.table
    }
}

impl StorageIterator for SSTableIterator {
    fn key(&self) -> &[u8] {
        self.current().entry(self.pos).key
    }

    fn value(&self) -> &[u8] {
        self.current().entry(self.pos).value
    }

    fn is_valid(&self) -> bool {
        self.block.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if self.block.is_some() {
            self.pos += 1;
            self.skip_exhausted_blocks()?;
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let target = InternalKey::seek_target(key, MAX_SEQUENCE);
        let idx = self.table.find_block(&target);
        self.load_block(idx)?;
        if let Some(block) = &self.block {
            self.pos = block.seek(&target);
        }
        self.skip_exhausted_blocks()
    }
}

impl VersionedIterator for SSTableIterator {
    fn sequence(&self) -> SeqNum {
        self.current().entry(self.pos).sequence
    }

    fn value_type(&self) -> ValueType {
        self.current().entry(self.pos).value_type
    }
}
