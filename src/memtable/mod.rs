pub mod skiplist;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::Result;
use crate::iterator::{StorageIterator, VersionedIterator};
use crate::types::{InternalKey, Lookup, MAX_SEQUENCE, SeqNum, ValueType};
use crate::wal::WALRecord;
use skiplist::SkipList;

/// In-memory sorted buffer for writes. Wraps a SkipList.
///
/// Every committed batch goes here first. When size exceeds the threshold,
/// the memtable is frozen (becomes immutable) and flushed to an SSTable.
///
/// The table is multi-versioned: every commit inserts new
/// `(key, sequence)` entries instead of overwriting, so a reader at an older
/// snapshot still finds the version it is entitled to.
///
/// Deletes are handled via tombstones. You can't just remove the key because
/// older versions may exist in SSTables on disk.
///
/// Writers (the commit path) take the write lock for one batch; readers take
/// the read lock for one lookup or one cursor step.
pub struct MemTable {
    /// Id of the WAL file holding this memtable's records.
    id: u64,
    data: RwLock<SkipList>,
    size_limit: usize,
    max_sequence: AtomicU64,
}

impl MemTable {
    /// Create a new empty memtable backed by WAL file `id`.
    pub fn new(id: u64, size_limit: usize) -> Self {
        MemTable {
            id,
            data: RwLock::new(SkipList::new()),
            size_limit,
            max_sequence: AtomicU64::new(0),
        }
    }

    /// Id of the WAL file this memtable mirrors.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Insert one version of a key.
    pub fn put(&self, key: Vec<u8>, sequence: SeqNum, value: Vec<u8>) {
        self.insert(InternalKey::new(key, sequence, ValueType::Put), value);
    }

    /// Mark a key as deleted as of `sequence` by writing a tombstone.
    pub fn delete(&self, key: Vec<u8>, sequence: SeqNum) {
        self.insert(InternalKey::new(key, sequence, ValueType::Delete), Vec::new());
    }

    fn insert(&self, key: InternalKey, value: Vec<u8>) {
        self.max_sequence.fetch_max(key.sequence, Ordering::AcqRel);
        self.data.write().insert(key, value);
    }

    /// Insert every entry of a committed batch under one write lock.
    ///
    /// Re-applying the same record is a no-op on the visible state: the
    /// entries land on the exact same internal keys.
    pub fn apply(&self, record: &WALRecord) {
        let mut data = self.data.write();
        for entry in &record.entries {
            let key = InternalKey::new(entry.key.clone(), record.sequence, entry.value_type);
            data.insert(key, entry.value.clone());
        }
        drop(data);
        self.max_sequence.fetch_max(record.sequence, Ordering::AcqRel);
    }

    /// Newest version of `key` with `sequence <= snapshot`.
    pub fn get(&self, key: &[u8], snapshot: SeqNum) -> Option<Lookup> {
        let data = self.data.read();
        let idx = data.seek(&InternalKey::seek_target(key, snapshot))?;
        let (found, value) = data.entry(idx);
        if found.user_key != key {
            return None;
        }
        Some(match found.value_type {
            ValueType::Put => Lookup::Found(value.to_vec()),
            ValueType::Delete => Lookup::Deleted,
        })
    }

    /// Sequence of the newest version of `key`, tombstones included.
    pub fn latest_sequence(&self, key: &[u8]) -> Option<SeqNum> {
        let data = self.data.read();
        let idx = data.seek(&InternalKey::seek_target(key, MAX_SEQUENCE))?;
        let (found, _) = data.entry(idx);
        (found.user_key == key).then_some(found.sequence)
    }

    /// Visit every entry in internal-key order under one read lock.
    /// Used to flush a frozen memtable, which no longer receives writes.
    pub fn scan<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&InternalKey, &[u8]) -> Result<()>,
    {
        let data = self.data.read();
        let mut cursor = data.first();
        while let Some(idx) = cursor {
            let (key, value) = data.entry(idx);
            f(key, value)?;
            cursor = data.next_of(idx);
        }
        Ok(())
    }

    /// Return a sorted cursor over all entries (including tombstones).
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        let mut iter = MemTableIterator {
            table: Arc::clone(self),
            current: None,
            key: InternalKey::new(Vec::new(), 0, ValueType::Put),
            value: Vec::new(),
        };
        let first = self.data.read().first();
        iter.load(first);
        iter
    }

    /// Current memory usage in bytes.
    pub fn size(&self) -> usize {
        self.data.read().size_bytes()
    }

    /// Number of stored versions.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Highest sequence inserted so far (0 when empty).
    pub fn max_sequence(&self) -> SeqNum {
        self.max_sequence.load(Ordering::Acquire)
    }

    /// Check if memtable has reached the flush threshold.
    pub fn is_full(&self) -> bool {
        self.size() >= self.size_limit
    }
}

/// Cursor over a shared memtable.
///
/// Holds the table by `Arc` and copies out the current entry, taking the
/// read lock only while stepping. Commits can land between steps; the cursor
/// keeps its arena position and simply observes the newer entries, which the
/// snapshot filter above it discards.
pub struct MemTableIterator {
    table: Arc<MemTable>,
    current: Option<usize>,
    key: InternalKey,
    value: Vec<u8>,
}

impl MemTableIterator {
    fn load(&mut self, idx: Option<usize>) {
        self.current = idx;
        if let Some(idx) = idx {
            let data = self.table.data.read();
            let (key, value) = data.entry(idx);
            self.key.clone_from(key);
            self.value.clear();
            self.value.extend_from_slice(value);
        }
    }

    pub fn internal_key(&self) -> &InternalKey {
        &self.key
    }
}

impl StorageIterator for MemTableIterator {
    fn key(&self) -> &[u8] {
        &self.key.user_key
    }

    fn value(&self) -> &[u8] {
        &self.value
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(idx) = self.current {
            let next = self.table.data.read().next_of(idx);
            self.load(next);
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let target = InternalKey::seek_target(key, MAX_SEQUENCE);
        let found = self.table.data.read().seek(&target);
        self.load(found);
        Ok(())
    }
}

impl VersionedIterator for MemTableIterator {
    fn sequence(&self) -> SeqNum {
        self.key.sequence
    }

    fn value_type(&self) -> ValueType {
        self.key.value_type
    }
}
