//! Snapshot-isolated transactions with commit-time conflict detection.
//!
//! A transaction reads the database as of the sequence number current when
//! it began, plus its own buffered writes. Nothing reaches the engine until
//! `commit`, which applies the whole buffer as one batch with one new
//! sequence number.
//!
//! Conflict detection is optimistic: `get`, `put` and `delete` record the key
//! as tracked, and commit fails with [`Error::Conflict`] if any tracked key
//! has a version committed after the snapshot. `put_untracked` buffers a
//! write without tracking, for keys the caller knows nobody else writes.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::sync::Arc;

use tracing::debug;

use crate::db::{DbInner, Snapshot};
use crate::error::{Error, Result};
use crate::iterator::merge::BufferIter;
use crate::iterator::{DbIterator, MergeIterator, Source};
use crate::types::{Key, SeqNum, Value};
use crate::wal::BatchEntry;

/// Lifecycle of a transaction. The two terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// A unit of work against a [`DB`](crate::DB).
///
/// Dropping an active transaction rolls it back.
pub struct Transaction {
    db: Arc<DbInner>,
    /// Registration that keeps compaction from dropping versions this
    /// transaction can still see. Released when the transaction ends.
    snapshot: Option<Snapshot>,
    sequence: SeqNum,
    /// Buffered writes, last write per key wins. `None` is a delete.
    writes: BTreeMap<Key, Option<Value>>,
    tracked: BTreeSet<Key>,
    state: TxState,
}

impl Transaction {
    pub(crate) fn new(db: Arc<DbInner>) -> Self {
        let snapshot = db.snapshot();
        let sequence = snapshot.sequence();
        Transaction {
            db,
            snapshot: Some(snapshot),
            sequence,
            writes: BTreeMap::new(),
            tracked: BTreeSet::new(),
            state: TxState::Active,
        }
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TxState::Active => Ok(()),
            state => Err(Error::InvalidState(format!("transaction is {state:?}"))),
        }
    }

    /// Read `key`: the transaction's own write if there is one, otherwise
    /// the committed value as of the snapshot.
    ///
    /// A read that reaches committed state tracks the key.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Value>> {
        self.ensure_active()?;
        if let Some(buffered) = self.writes.get(key) {
            return Ok(buffered.clone());
        }
        self.tracked.insert(key.to_vec());
        self.db.get(key, self.sequence)
    }

    /// Buffer a write of `key` and track it.
    pub fn put(&mut self, key: Key, value: Value) -> Result<()> {
        self.ensure_active()?;
        self.tracked.insert(key.clone());
        self.writes.insert(key, Some(value));
        Ok(())
    }

    /// Buffer a write of `key` and exempt it from conflict detection, even
    /// if an earlier call in this transaction tracked it.
    pub fn put_untracked(&mut self, key: Key, value: Value) -> Result<()> {
        self.ensure_active()?;
        self.tracked.remove(&key);
        self.writes.insert(key, Some(value));
        Ok(())
    }

    /// Buffer a delete of `key` and track it.
    pub fn delete(&mut self, key: Key) -> Result<()> {
        self.ensure_active()?;
        self.tracked.insert(key.clone());
        self.writes.insert(key, None);
        Ok(())
    }

    /// Apply every buffered write atomically.
    ///
    /// Returns the commit's sequence number, or the latest committed one
    /// when nothing was written. On any error the transaction is
    /// rolled back; on [`Error::Conflict`] the caller should retry it.
    pub fn commit(&mut self) -> Result<SeqNum> {
        self.ensure_active()?;
        let entries: Vec<BatchEntry> = mem::take(&mut self.writes)
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => BatchEntry::put(key, value),
                None => BatchEntry::delete(key),
            })
            .collect();
        let tracked = mem::take(&mut self.tracked);

        let result = if entries.is_empty() && tracked.is_empty() {
            Ok(self.db.last_sequence())
        } else {
            self.db.commit_batch(entries, Some((&tracked, self.sequence)))
        };
        self.snapshot = None;
        match result {
            Ok(sequence) => {
                self.state = TxState::Committed;
                debug!(snapshot = self.sequence, sequence, "committed transaction");
                Ok(sequence)
            }
            Err(e) => {
                self.state = TxState::RolledBack;
                Err(e)
            }
        }
    }

    /// Discard every buffered write.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.writes.clear();
        self.tracked.clear();
        self.snapshot = None;
        self.state = TxState::RolledBack;
        Ok(())
    }

    /// Cursor over the keys starting with `prefix`, as seen by this
    /// transaction.
    ///
    /// The cursor sees the snapshot plus the writes buffered before this
    /// call; the borrow keeps the buffer from changing underneath it.
    pub fn iterate(&self, prefix: &[u8]) -> Result<DbIterator<'_>> {
        self.ensure_active()?;
        let version = self.db.current_version();
        let mut sources = Vec::with_capacity(2 + version.frozen.len() + version.segments.len());
        if !self.writes.is_empty() {
            sources.push(Source::Buffer(BufferIter::new(&self.writes)));
        }
        sources.extend(version.sources()?);
        DbIterator::new(MergeIterator::new(sources), self.sequence, prefix)
    }

    /// Sequence number this transaction reads at.
    pub fn snapshot(&self) -> SeqNum {
        self.sequence
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            let _ = self.rollback();
        }
    }
}
