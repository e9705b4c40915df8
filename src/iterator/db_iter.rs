use crate::error::Result;
use crate::iterator::merge::MergeIterator;
use crate::iterator::{StorageIterator, VersionedIterator};
use crate::types::{MAX_SEQUENCE, SeqNum, ValueType};

/// Exclusive upper bound of all keys starting with `prefix`: strip trailing
/// `0xFF` bytes and increment the last remaining byte. `None` when every key
/// ≥ prefix matches (empty or all-`0xFF` prefix).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Snapshot-consistent, prefix-bounded view over a merge of the write
/// buffer, memtables and segments.
///
/// Yields each user key once, with its newest version visible at the
/// snapshot (the transaction's own writes always visible). Keys whose
/// visible version is a tombstone are skipped.
///
/// The sources hold `Arc`s of the memtables and segments they read, so a
/// compaction that finishes mid-scan cannot pull files out from under it.
pub struct DbIterator<'a> {
    merge: MergeIterator<'a>,
    snapshot: SeqNum,
    upper_bound: Option<Vec<u8>>,
    /// Key the cursor sits on while valid; reused across steps.
    current_key: Vec<u8>,
    valid: bool,
}

impl<'a> DbIterator<'a> {
    /// Wrap `merge` and position at the first visible key ≥ `prefix`.
    pub fn new(merge: MergeIterator<'a>, snapshot: SeqNum, prefix: &[u8]) -> Result<Self> {
        let mut iter = DbIterator {
            merge,
            snapshot,
            upper_bound: None,
            current_key: Vec::new(),
            valid: false,
        };
        iter.seek(prefix)?;
        Ok(iter)
    }

    fn visible(&self) -> bool {
        let sequence = self.merge.sequence();
        sequence == MAX_SEQUENCE || sequence <= self.snapshot
    }

    /// Advance the merge past every remaining version of `current_key`.
    fn skip_current_key(&mut self) -> Result<()> {
        while self.merge.is_valid() && self.merge.key() == self.current_key.as_slice() {
            self.merge.next()?;
        }
        Ok(())
    }

    /// Move forward until the merge sits on the newest visible version of a
    /// live key inside the bounds, or run out.
    fn settle(&mut self) -> Result<()> {
        loop {
            if !self.merge.is_valid() {
                self.valid = false;
                return Ok(());
            }
            if let Some(upper) = &self.upper_bound {
                if self.merge.key() >= upper.as_slice() {
                    self.valid = false;
                    return Ok(());
                }
            }
            if !self.visible() {
                self.merge.next()?;
                continue;
            }

            self.current_key.clear();
            self.current_key.extend_from_slice(self.merge.key());
            match self.merge.value_type() {
                ValueType::Put => {
                    self.valid = true;
                    return Ok(());
                }
                ValueType::Delete => self.skip_current_key()?,
            }
        }
    }

    /// The snapshot this iterator reads at.
    pub fn snapshot(&self) -> SeqNum {
        self.snapshot
    }
}

impl StorageIterator for DbIterator<'_> {
    fn key(&self) -> &[u8] {
        &self.current_key
    }

    fn value(&self) -> &[u8] {
        self.merge.value()
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn next(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        self.skip_current_key()?;
        self.settle()
    }

    /// Reposition at the first visible key ≥ `prefix`, bounded by the
    /// prefix's upper bound. The merge keeps its sources and heap storage.
    fn seek(&mut self, prefix: &[u8]) -> Result<()> {
        self.upper_bound = prefix_upper_bound(prefix);
        self.merge.seek(prefix)?;
        self.settle()
    }
}
