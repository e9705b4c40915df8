use std::cmp::Ordering;
use std::collections::btree_map::{self, BTreeMap};
use std::collections::BinaryHeap;
use std::ops::Bound;

use crate::error::Result;
use crate::iterator::{StorageIterator, VersionedIterator};
use crate::memtable::MemTableIterator;
use crate::sstable::SSTableIterator;
use crate::types::{cmp_internal, Key, MAX_SEQUENCE, SeqNum, Value, ValueType};

/// Cursor over a transaction's write buffer (`None` = buffered delete).
///
/// Buffered entries carry [`MAX_SEQUENCE`], so they shadow every committed
/// version of the same key.
pub struct BufferIter<'a> {
    buffer: &'a BTreeMap<Key, Option<Value>>,
    range: btree_map::Range<'a, Key, Option<Value>>,
    current: Option<(&'a Key, &'a Option<Value>)>,
}

impl<'a> BufferIter<'a> {
    pub fn new(buffer: &'a BTreeMap<Key, Option<Value>>) -> Self {
        let mut range = buffer.range::<[u8], _>((Bound::Unbounded, Bound::Unbounded));
        let current = range.next();
        BufferIter {
            buffer,
            range,
            current,
        }
    }

    fn entry(&self) -> (&'a Key, &'a Option<Value>) {
        self.current.expect("iterator is not valid")
    }
}

impl StorageIterator for BufferIter<'_> {
    fn key(&self) -> &[u8] {
        self.entry().0
    }

    fn value(&self) -> &[u8] {
        self.entry().1.as_deref().unwrap_or_default()
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if self.current.is_some() {
            self.current = self.range.next();
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.range = self
            .buffer
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded));
        self.current = self.range.next();
        Ok(())
    }
}

impl VersionedIterator for BufferIter<'_> {
    fn sequence(&self) -> SeqNum {
        MAX_SEQUENCE
    }

    fn value_type(&self) -> ValueType {
        match self.entry().1 {
            Some(_) => ValueType::Put,
            None => ValueType::Delete,
        }
    }
}

/// One input of a merge: a tagged variant so the merge can hold every kind
/// of sorted source in one vector.
pub enum Source<'a> {
    Buffer(BufferIter<'a>),
    MemTable(MemTableIterator),
    Segment(SSTableIterator),
}

macro_rules! dispatch {
    ($self:expr, $it:ident => $body:expr) => {
        match $self {
            Source::Buffer($it) => $body,
            Source::MemTable($it) => $body,
            Source::Segment($it) => $body,
        }
    };
}

impl StorageIterator for Source<'_> {
    fn key(&self) -> &[u8] {
        dispatch!(self, it => it.key())
    }

    fn value(&self) -> &[u8] {
        dispatch!(self, it => it.value())
    }

    fn is_valid(&self) -> bool {
        dispatch!(self, it => it.is_valid())
    }

    fn next(&mut self) -> Result<()> {
        dispatch!(self, it => it.next())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        dispatch!(self, it => it.seek(key))
    }
}

impl VersionedIterator for Source<'_> {
    fn sequence(&self) -> SeqNum {
        dispatch!(self, it => it.sequence())
    }

    fn value_type(&self) -> ValueType {
        dispatch!(self, it => it.value_type())
    }
}

/// Heap slot: the current position of one source.
#[derive(PartialEq, Eq)]
struct HeapItem {
    key: Vec<u8>,
    sequence: SeqNum,
    source: usize,
}

impl Ord for HeapItem {
    // BinaryHeap is a max-heap; reverse so the smallest internal key
    // (and, on a tie, the lowest source index) is on top.
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_internal(&self.key, self.sequence, &other.key, other.sequence)
            .then_with(|| self.source.cmp(&other.source))
            .reverse()
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges multiple sorted sources into a single sorted stream.
///
/// Used for:
/// - Range scans across write buffer + memtables + all segments
/// - Compaction (merging segments)
///
/// Ordering guarantee: entries are yielded in (user_key ASC, sequence DESC)
/// order. Every version is yielded; deduplication, snapshot visibility and
/// tombstone suppression belong to the consumer.
pub struct MergeIterator<'a> {
    sources: Vec<Source<'a>>,
    heap: BinaryHeap<HeapItem>,
}

impl<'a> MergeIterator<'a> {
    /// Create a new MergeIterator from multiple sorted sources, each already
    /// positioned.
    pub fn new(sources: Vec<Source<'a>>) -> Self {
        let mut merge = MergeIterator {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
        };
        merge.rebuild_heap();
        merge
    }

    fn push(&mut self, source: usize) {
        let it = &self.sources[source];
        if it.is_valid() {
            self.heap.push(HeapItem {
                key: it.key().to_vec(),
                sequence: it.sequence(),
                source,
            });
        }
    }

    fn rebuild_heap(&mut self) {
        self.heap.clear();
        for source in 0..self.sources.len() {
            self.push(source);
        }
    }

    fn top(&self) -> &Source<'a> {
        let item = self.heap.peek().expect("iterator is not valid");
        &self.sources[item.source]
    }
}

impl StorageIterator for MergeIterator<'_> {
    fn key(&self) -> &[u8] {
        self.top().key()
    }

    fn value(&self) -> &[u8] {
        self.top().value()
    }

    fn is_valid(&self) -> bool {
        !self.heap.is_empty()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(item) = self.heap.pop() {
            self.sources[item.source].next()?;
            self.push(item.source);
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        for source in &mut self.sources {
            source.seek(key)?;
        }
        self.rebuild_heap();
        Ok(())
    }
}

impl VersionedIterator for MergeIterator<'_> {
    fn sequence(&self) -> SeqNum {
        self.top().sequence()
    }

    fn value_type(&self) -> ValueType {
        self.top().value_type()
    }
}
