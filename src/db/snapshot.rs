use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::types::SeqNum;

/// Reference-counted set of sequence numbers that readers are pinned at.
///
/// Taking a snapshot and computing the compaction watermark both read the
/// last committed sequence while holding the registry lock, so a snapshot
/// can never be registered below a watermark that compaction already used.
#[derive(Debug, Default)]
pub struct SnapshotList {
    pinned: Mutex<BTreeMap<SeqNum, usize>>,
}

impl SnapshotList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the current value of `last_sequence`.
    pub fn acquire(self: &Arc<Self>, last_sequence: &AtomicU64) -> Snapshot {
        let mut pinned = self.pinned.lock();
        let sequence = last_sequence.load(Ordering::Acquire);
        *pinned.entry(sequence).or_insert(0) += 1;
        Snapshot {
            list: Arc::clone(self),
            sequence,
        }
    }

    fn release(&self, sequence: SeqNum) {
        let mut pinned = self.pinned.lock();
        if let Some(count) = pinned.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&sequence);
            }
        }
    }

    /// Oldest pinned sequence, if any reader is active.
    pub fn oldest(&self) -> Option<SeqNum> {
        self.pinned.lock().keys().next().copied()
    }

    /// Oldest sequence any current or future reader may read at.
    pub fn watermark(&self, last_sequence: &AtomicU64) -> SeqNum {
        let pinned = self.pinned.lock();
        let last = last_sequence.load(Ordering::Acquire);
        pinned.keys().next().map_or(last, |&oldest| oldest.min(last))
    }

    /// Number of live snapshot guards.
    pub fn len(&self) -> usize {
        self.pinned.lock().values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pinned.lock().is_empty()
    }
}

/// A registered read point. Releases its registration on drop.
#[derive(Debug)]
pub struct Snapshot {
    list: Arc<SnapshotList>,
    sequence: SeqNum,
}

impl Snapshot {
    pub fn sequence(&self) -> SeqNum {
        self.sequence
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.list.release(self.sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_are_reference_counted() {
        let list = Arc::new(SnapshotList::new());
        let last = AtomicU64::new(5);

        let a = list.acquire(&last);
        let b = list.acquire(&last);
        last.store(9, Ordering::Release);
        let c = list.acquire(&last);

        assert_eq!(list.len(), 3);
        assert_eq!(list.oldest(), Some(5));
        drop(a);
        assert_eq!(list.oldest(), Some(5));
        drop(b);
        assert_eq!(list.oldest(), Some(9));
        assert_eq!(c.sequence(), 9);
        drop(c);
        assert!(list.is_empty());
    }

    #[test]
    fn watermark_defaults_to_last_sequence() {
        let list = Arc::new(SnapshotList::new());
        let last = AtomicU64::new(42);
        assert_eq!(list.watermark(&last), 42);

        let _pin = list.acquire(&last);
        last.store(50, Ordering::Release);
        assert_eq!(list.watermark(&last), 42);
    }
}
