use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Raw key bytes.
pub type Key = Vec<u8>;

/// Raw value bytes.
pub type Value = Vec<u8>;

/// Commit sequence number. Totally orders all committed batches.
/// `0` means "nothing committed yet".
pub type SeqNum = u64;

/// Sequence used for entries that sort before every committed version of the
/// same key: seek targets for "newest version" and a transaction's own
/// buffered writes.
pub const MAX_SEQUENCE: SeqNum = u64::MAX;

/// Distinguishes puts from deletes in the storage engine.
/// A Delete writes a tombstone: the key isn't removed, it's marked as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueType {
    /// A normal put operation.
    Put = 0x01,
    /// A delete (tombstone marker).
    Delete = 0x02,
}

impl ValueType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(ValueType::Put),
            0x02 => Ok(ValueType::Delete),
            _ => Err(Error::Corruption(format!("invalid value type: {byte}"))),
        }
    }

    pub fn is_delete(self) -> bool {
        self == ValueType::Delete
    }
}

/// Internal key format: user key + sequence number + value type.
///
/// Ordering: (user_key ASC, sequence DESC).
/// This ensures the newest version of a key always comes first during merging.
///
/// The sequence number is assigned once per committed batch. It provides a
/// total ordering of all writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InternalKey {
    pub user_key: Key,
    pub sequence: SeqNum,
    pub value_type: ValueType,
}

impl InternalKey {
    pub fn new(user_key: Key, sequence: SeqNum, value_type: ValueType) -> Self {
        InternalKey {
            user_key,
            sequence,
            value_type,
        }
    }

    /// Smallest internal key for `user_key` visible at `snapshot`.
    /// The first entry `>=` this target is the newest version with
    /// `sequence <= snapshot`.
    pub fn seek_target(user_key: &[u8], snapshot: SeqNum) -> Self {
        InternalKey {
            user_key: user_key.to_vec(),
            sequence: snapshot,
            value_type: ValueType::Put,
        }
    }

    /// Approximate in-memory footprint, used for memtable accounting.
    pub fn approximate_size(&self) -> usize {
        self.user_key.len() + 9
    }
}

/// Compare two (user_key, sequence) pairs in internal-key order.
pub fn cmp_internal(a_key: &[u8], a_seq: SeqNum, b_key: &[u8], b_seq: SeqNum) -> Ordering {
    a_key.cmp(b_key).then_with(|| b_seq.cmp(&a_seq))
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_internal(&self.user_key, self.sequence, &other.user_key, other.sequence)
            .then_with(|| self.value_type.cmp(&other.value_type))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of a point lookup in one sorted source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Newest visible version is a value.
    Found(Value),
    /// Newest visible version is a tombstone. Stops the search.
    Deleted,
}

impl Lookup {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::Deleted => None,
        }
    }
}
