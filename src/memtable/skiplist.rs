use rand::Rng;

use crate::error::Result;
use crate::iterator::{StorageIterator, VersionedIterator};
use crate::types::{InternalKey, MAX_SEQUENCE, SeqNum, ValueType};

/// Maximum height of the skip list. LevelDB uses 12.
pub const MAX_HEIGHT: usize = 12;

/// Fixed per-node bookkeeping charged on top of key and value bytes.
const NODE_OVERHEAD: usize = 32;

/// A single node in the skip list.
///
/// Each node has `height` forward pointers. Level 0 contains all nodes
/// (a regular linked list). Higher levels skip over nodes, enabling
/// O(log n) average-case search.
///
/// ```text
/// Level 3:  HEAD ──────────────────────────────► 50 ──────────► NIL
/// Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► NIL
/// Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► NIL
/// Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► NIL
/// ```
///
/// Pointers are indices into the arena (`SkipList::nodes`). Nodes are never
/// removed, so an index stays valid for the lifetime of the list; cursors
/// rely on that to resume after the list grew underneath them.
struct SkipNode {
    key: InternalKey,
    value: Vec<u8>,
    forward: Vec<Option<usize>>,
}

/// A probabilistic sorted data structure ordered by [`InternalKey`].
///
/// Average case: O(log n) insert, O(log n) lookup, O(n) iteration.
/// Worst case: O(n), but astronomically unlikely with random level assignment.
pub struct SkipList {
    head: [Option<usize>; MAX_HEIGHT],
    nodes: Vec<SkipNode>,
    height: usize,
    size_bytes: usize,
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl SkipList {
    /// Create a new empty skip list.
    pub fn new() -> Self {
        SkipList {
            head: [None; MAX_HEIGHT],
            nodes: Vec::new(),
            height: 1,
            size_bytes: 0,
        }
    }

    fn forward(&self, at: Option<usize>, level: usize) -> Option<usize> {
        match at {
            None => self.head[level],
            Some(idx) => self.nodes[idx].forward[level],
        }
    }

    fn set_forward(&mut self, at: Option<usize>, level: usize, to: Option<usize>) {
        match at {
            None => self.head[level] = to,
            Some(idx) => self.nodes[idx].forward[level] = to,
        }
    }

    /// For every level, the last node whose key is < `key` (`None` = head).
    fn find_predecessors(&self, key: &InternalKey) -> [Option<usize>; MAX_HEIGHT] {
        let mut preds = [None; MAX_HEIGHT];
        let mut current = None;
        for level in (0..self.height).rev() {
            while let Some(next) = self.forward(current, level) {
                if self.nodes[next].key < *key {
                    current = Some(next);
                } else {
                    break;
                }
            }
            preds[level] = current;
        }
        preds
    }

    /// Insert a key-value pair. Overwrites if the exact internal key exists.
    ///
    /// Algorithm:
    ///   1. Find the insertion point at each level (track predecessors)
    ///   2. Generate a random height for the new node (coin flip per level)
    ///   3. Create node with that height
    ///   4. Splice into the list at each level up to the node's height
    pub fn insert(&mut self, key: InternalKey, value: Vec<u8>) {
        let preds = self.find_predecessors(&key);

        if let Some(existing) = self.forward(preds[0], 0) {
            if self.nodes[existing].key == key {
                let node = &mut self.nodes[existing];
                self.size_bytes = self.size_bytes - node.value.len() + value.len();
                node.value = value;
                return;
            }
        }

        let height = Self::random_height();
        if height > self.height {
            // Levels above the old height have the head as predecessor,
            // which `preds` already holds as `None`.
            self.height = height;
        }

        self.size_bytes += key.approximate_size() + value.len() + NODE_OVERHEAD;
        let idx = self.nodes.len();
        self.nodes.push(SkipNode {
            key,
            value,
            forward: vec![None; height],
        });

        for (level, pred) in preds.iter().enumerate().take(height) {
            let next = self.forward(*pred, level);
            self.nodes[idx].forward[level] = next;
            self.set_forward(*pred, level, Some(idx));
        }
    }

    /// Look up an exact internal key.
    pub fn get(&self, key: &InternalKey) -> Option<&[u8]> {
        let idx = self.seek(key)?;
        let node = &self.nodes[idx];
        (node.key == *key).then_some(node.value.as_slice())
    }

    /// Index of the first node whose key is >= `target`.
    ///
    /// Algorithm:
    ///   1. Start at head, highest level
    ///   2. Move forward while next key < target
    ///   3. Drop down one level
    ///   4. Repeat until level 0
    pub fn seek(&self, target: &InternalKey) -> Option<usize> {
        let mut current = None;
        for level in (0..self.height).rev() {
            while let Some(next) = self.forward(current, level) {
                if self.nodes[next].key < *target {
                    current = Some(next);
                } else {
                    break;
                }
            }
        }
        self.forward(current, 0)
    }

    /// Index of the first node in sorted order.
    pub fn first(&self) -> Option<usize> {
        self.head[0]
    }

    /// Index of the node following `idx` on level 0.
    pub fn next_of(&self, idx: usize) -> Option<usize> {
        self.nodes[idx].forward[0]
    }

    /// Key and value stored at arena index `idx`.
    pub fn entry(&self, idx: usize) -> (&InternalKey, &[u8]) {
        let node = &self.nodes[idx];
        (&node.key, &node.value)
    }

    /// Number of entries in the skip list.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the skip list is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Approximate memory usage in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Create an iterator over all entries in sorted order.
    /// Traverses level 0 (the bottom level contains all entries).
    pub fn iter(&self) -> SkipListIterator<'_> {
        SkipListIterator {
            list: self,
            current: self.first(),
        }
    }

    /// Generate a random level for a new node.
    /// Each level has a 1/4 probability (LevelDB uses 1/4, not 1/2).
    fn random_height() -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_ratio(1, 4) {
            height += 1;
        }
        height
    }
}

/// Iterator over skip list entries in sorted order.
///
/// Simply follows level 0 forward pointers: level 0 is a sorted linked list
/// containing every entry.
pub struct SkipListIterator<'a> {
    list: &'a SkipList,
    current: Option<usize>,
}

impl SkipListIterator<'_> {
    /// Full internal key at the current position.
    pub fn internal_key(&self) -> &InternalKey {
        self.list.entry(self.position()).0
    }

    fn position(&self) -> usize {
        self.current.expect("iterator is not valid")
    }
}

impl StorageIterator for SkipListIterator<'_> {
    fn key(&self) -> &[u8] {
        &self.internal_key().user_key
    }

    fn value(&self) -> &[u8] {
        self.list.entry(self.position()).1
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(idx) = self.current {
            self.current = self.list.next_of(idx);
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.current = self.list.seek(&InternalKey::seek_target(key, MAX_SEQUENCE));
        Ok(())
    }
}

impl VersionedIterator for SkipListIterator<'_> {
    fn sequence(&self) -> SeqNum {
        self.internal_key().sequence
    }

    fn value_type(&self) -> ValueType {
        self.internal_key().value_type
    }
}
