//! Rebuilding memtable state from write-ahead logs.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::Result;
use crate::memtable::MemTable;
use crate::types::SeqNum;
use crate::wal::reader::WALReader;

/// What replaying one WAL file produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records applied to the memtable.
    pub applied: usize,
    /// Records skipped because a segment already holds them.
    pub skipped: usize,
    /// Highest sequence seen in the file (0 when empty).
    pub max_sequence: SeqNum,
    /// The file ended in a partial or corrupt record.
    pub torn_tail: bool,
}

/// Replay every intact record of the WAL at `path` into `memtable`,
/// skipping records with a sequence at or below `flushed_sequence`.
///
/// Replay stops at the first record that fails to decode; anything after a
/// torn write was never acknowledged. Replaying the same file again
/// re-inserts the same `(key, sequence)` entries and leaves the memtable's
/// visible state unchanged.
pub fn replay_wal(path: &Path, memtable: &MemTable, flushed_sequence: SeqNum) -> Result<ReplayStats> {
    let reader = WALReader::new(path)?;
    let mut stats = ReplayStats::default();

    let mut records = reader.iter();
    for record in records.by_ref() {
        let record = record?;
        stats.max_sequence = stats.max_sequence.max(record.sequence);
        if record.sequence <= flushed_sequence {
            stats.skipped += 1;
            continue;
        }
        memtable.apply(&record);
        stats.applied += 1;
    }

    if records.offset() < reader.len() {
        stats.torn_tail = true;
        warn!(
            path = %path.display(),
            valid_bytes = records.offset(),
            file_bytes = reader.len(),
            "ignoring torn WAL tail"
        );
    }
    debug!(
        path = %path.display(),
        applied = stats.applied,
        skipped = stats.skipped,
        "replayed WAL"
    );
    Ok(stats)
}
