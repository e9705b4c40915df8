//! Segment compaction and I/O retry policy.
//!
//! Compaction merges every input segment into one, keeping for each key:
//! - every version newer than the watermark (some live snapshot may still
//!   need to choose between them), and
//! - the newest version at or below the watermark, unless it is a tombstone.
//!
//! The watermark is the oldest registered snapshot (or the last committed
//! sequence when none is registered). The inputs always include the oldest
//! segment, so a tombstone at or below the watermark has nothing left to
//! shadow and is dropped.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::iterator::{MergeIterator, Source, StorageIterator, VersionedIterator};
use crate::sstable::{SSTable, SSTableBuilder, SSTableMeta};
use crate::types::{InternalKey, SeqNum};

/// Level recorded for compaction output.
pub const COMPACTED_LEVEL: u32 = 1;

/// Entries merged between cooperative yields of the compaction thread.
const YIELD_EVERY: u64 = 1024;

/// Knobs for writing a compaction output segment.
#[derive(Debug, Clone, Copy)]
pub struct CompactionParams {
    pub block_size: usize,
    pub bloom_false_positive_rate: f64,
    /// Oldest sequence a live snapshot may read at.
    pub watermark: SeqNum,
}

/// Outcome of merging a set of segments.
#[derive(Debug, Clone, Default)]
pub struct CompactionOutput {
    /// `None` when every input entry was garbage.
    pub meta: Option<SSTableMeta>,
    pub entries_read: u64,
    pub entries_dropped: u64,
}

/// Merge `inputs` (newest first) into a new segment at `path` with id `id`.
///
/// A partial output file is removed on error, so the caller may retry.
pub fn compact_segments(
    inputs: &[Arc<SSTable>],
    path: &Path,
    id: u64,
    params: CompactionParams,
) -> Result<CompactionOutput> {
    let result = merge_into(inputs, path, id, params);
    if result.is_err() || matches!(&result, Ok(out) if out.meta.is_none()) {
        let _ = fs::remove_file(path);
    }
    result
}

fn merge_into(
    inputs: &[Arc<SSTable>],
    path: &Path,
    id: u64,
    params: CompactionParams,
) -> Result<CompactionOutput> {
    let mut sources = Vec::with_capacity(inputs.len());
    for table in inputs {
        sources.push(Source::Segment(table.iter()?));
    }
    let mut merge = MergeIterator::new(sources);

    let mut builder = SSTableBuilder::new(path, id, params.block_size)?
        .with_level(COMPACTED_LEVEL)
        .with_bloom_false_positive_rate(params.bloom_false_positive_rate);

    let mut output = CompactionOutput::default();
    let mut current_key: Option<Vec<u8>> = None;
    let mut last_sequence = SeqNum::MAX;
    // Set once the newest version at or below the watermark has been seen.
    let mut settled = false;

    while merge.is_valid() {
        output.entries_read += 1;
        if output.entries_read % YIELD_EVERY == 0 {
            thread::yield_now();
        }

        let sequence = merge.sequence();
        let same_key = current_key.as_deref() == Some(merge.key());
        if !same_key {
            current_key = Some(merge.key().to_vec());
            settled = false;
        } else if sequence == last_sequence {
            // Identical version present in two inputs.
            output.entries_dropped += 1;
            merge.next()?;
            continue;
        }
        last_sequence = sequence;

        let keep = if sequence > params.watermark {
            true
        } else if !settled {
            settled = true;
            !merge.value_type().is_delete()
        } else {
            false
        };

        if keep {
            let key = InternalKey::new(merge.key().to_vec(), sequence, merge.value_type());
            builder.add(&key, merge.value())?;
        } else {
            output.entries_dropped += 1;
        }
        merge.next()?;
    }

    if builder.entry_count() == 0 {
        return Ok(output);
    }
    output.meta = Some(builder.finish()?);
    debug!(
        id,
        read = output.entries_read,
        dropped = output.entries_dropped,
        "merged segments"
    );
    Ok(output)
}

/// Run `op`, retrying I/O failures with exponential backoff.
///
/// Non-I/O errors (corruption, logic errors) are returned immediately.
pub fn retry_io<T>(
    what: &str,
    max_retries: u32,
    backoff: Duration,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(Error::Io(e)) if attempt < max_retries => {
                let delay = backoff * 2u32.pow(attempt.min(16));
                warn!(operation = what, attempt, error = %e, ?delay, "I/O failure, retrying");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
