use std::time::Duration;

use crate::sstable::builder::DEFAULT_BLOOM_FPR;
use crate::wal::SyncPolicy;

/// Tuning knobs for a database instance.
#[derive(Debug, Clone)]
pub struct Options {
    /// Active memtable size that triggers a freeze and flush.
    pub memtable_size: usize,
    /// Target size of a segment data block.
    pub block_size: usize,
    pub bloom_false_positive_rate: f64,
    pub sync_policy: SyncPolicy,
    /// Segment count that schedules a background compaction.
    pub compaction_trigger: usize,
    /// Run flush and compaction on a worker thread. When false they run
    /// inline on the committing thread.
    pub background_work: bool,
    /// Retries for a failed flush or compaction before going read-only.
    pub max_io_retries: u32,
    /// Delay before the first retry; doubled on each further attempt.
    pub retry_backoff: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            memtable_size: 4 * 1024 * 1024,
            block_size: 4 * 1024,
            bloom_false_positive_rate: DEFAULT_BLOOM_FPR,
            sync_policy: SyncPolicy::EveryWrite,
            compaction_trigger: 4,
            background_work: true,
            max_io_retries: 5,
            retry_backoff: Duration::from_millis(10),
        }
    }
}

impl Options {
    pub fn with_memtable_size(mut self, bytes: usize) -> Self {
        self.memtable_size = bytes;
        self
    }

    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn with_bloom_false_positive_rate(mut self, rate: f64) -> Self {
        self.bloom_false_positive_rate = rate;
        self
    }

    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn with_compaction_trigger(mut self, segments: usize) -> Self {
        self.compaction_trigger = segments.max(1);
        self
    }

    pub fn with_background_work(mut self, enabled: bool) -> Self {
        self.background_work = enabled;
        self
    }

    pub fn with_max_io_retries(mut self, retries: u32) -> Self {
        self.max_io_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Point-in-time counters describing the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub last_sequence: u64,
    pub active_memtable_bytes: usize,
    pub frozen_memtables: usize,
    pub segments: usize,
    pub segment_bytes: u64,
    /// Stored versions across segments, tombstones included.
    pub segment_entries: u64,
    pub active_snapshots: usize,
    pub flushes: u64,
    pub compactions: u64,
    pub read_only: bool,
}
