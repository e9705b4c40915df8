pub mod db_iter;
pub mod merge;

pub use db_iter::DbIterator;
pub use merge::{MergeIterator, Source};

use crate::error::Result;
use crate::types::{SeqNum, ValueType};

/// The central iteration abstraction for the storage engine.
///
/// Every sorted data source (skip list, block, SSTable, merged view)
/// implements this trait. This enables composability: the merge layer
/// combines any of them behind one cursor.
pub trait StorageIterator {
    /// Returns the current key. Only valid when is_valid() is true.
    fn key(&self) -> &[u8];

    /// Returns the current value. Only valid when is_valid() is true.
    fn value(&self) -> &[u8];

    /// Returns true if the iterator is positioned at a valid entry.
    fn is_valid(&self) -> bool;

    /// Advances to the next entry. Returns error on IO failure.
    fn next(&mut self) -> Result<()>;

    /// Positions the iterator at the first entry with key >= target.
    fn seek(&mut self, key: &[u8]) -> Result<()>;
}

/// A source that yields every stored version of each key, ordered by
/// (user_key ASC, sequence DESC), tombstones included.
///
/// Snapshot filtering and tombstone suppression happen above this layer.
pub trait VersionedIterator: StorageIterator {
    /// Commit sequence of the current entry.
    fn sequence(&self) -> SeqNum;

    /// Whether the current entry is a value or a tombstone.
    fn value_type(&self) -> ValueType;
}
