use std::sync::Arc;

use crate::error::Result;
use crate::iterator::Source;
use crate::memtable::MemTable;
use crate::sstable::SSTable;
use crate::types::{Lookup, SeqNum};

/// Immutable view of the engine's sorted sources.
///
/// Replaced wholesale on freeze, flush and compaction. Readers clone the
/// `Arc<Version>` and keep every memtable and segment in it alive for as
/// long as they read.
pub struct Version {
    /// The only memtable accepting writes.
    pub active: Arc<MemTable>,
    /// Frozen memtables waiting for flush, newest first.
    pub frozen: Vec<Arc<MemTable>>,
    /// Live segments, newest first.
    pub segments: Vec<Arc<SSTable>>,
}

impl Version {
    pub fn new(active: Arc<MemTable>, segments: Vec<Arc<SSTable>>) -> Self {
        Version {
            active,
            frozen: Vec::new(),
            segments,
        }
    }

    /// Memtables newest first, active included.
    pub fn memtables(&self) -> impl Iterator<Item = &Arc<MemTable>> {
        std::iter::once(&self.active).chain(self.frozen.iter())
    }

    /// Newest version of `key` visible at `snapshot`.
    pub fn get(&self, key: &[u8], snapshot: SeqNum) -> Result<Option<Lookup>> {
        for memtable in self.memtables() {
            if let Some(found) = memtable.get(key, snapshot) {
                return Ok(Some(found));
            }
        }
        for segment in &self.segments {
            if let Some(found) = segment.get(key, snapshot)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Sequence of the newest stored version of `key`, tombstones included.
    ///
    /// Sources are checked newest first, so the first hit is the answer.
    pub fn latest_sequence(&self, key: &[u8]) -> Result<Option<SeqNum>> {
        for memtable in self.memtables() {
            if let Some(sequence) = memtable.latest_sequence(key) {
                return Ok(Some(sequence));
            }
        }
        for segment in &self.segments {
            if let Some(sequence) = segment.latest_sequence(key)? {
                return Ok(Some(sequence));
            }
        }
        Ok(None)
    }

    /// One merge source per memtable and segment, newest first.
    pub fn sources<'a>(&self) -> Result<Vec<Source<'a>>> {
        let mut sources = Vec::with_capacity(1 + self.frozen.len() + self.segments.len());
        for memtable in self.memtables() {
            sources.push(Source::MemTable(memtable.iter()));
        }
        for segment in &self.segments {
            sources.push(Source::Segment(segment.iter()?));
        }
        Ok(sources)
    }

    /// Total size of all live segment files.
    pub fn segment_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.meta().file_size).sum()
    }
}
