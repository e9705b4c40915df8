//! # txkv
//!
//! An embedded, transactional key-value engine built on a Log-Structured
//! Merge-Tree.
//!
//! ## Core idea
//! Writes are buffered per transaction, committed as one atomic batch to a
//! write-ahead log and an in-memory sorted table, and later flushed as
//! immutable sorted segments that a background worker merges. Every committed
//! batch gets one sequence number; a transaction reads the state as of the
//! sequence number it started at.
//!
//! ```no_run
//! use txkv::{DB, Options, StorageIterator};
//!
//! # fn main() -> txkv::Result<()> {
//! let db = DB::open("/tmp/txkv-demo", Options::default())?;
//! let mut tx = db.begin();
//! tx.put(b"ab".to_vec(), b"1".to_vec())?;
//! tx.commit()?;
//!
//! let tx = db.begin();
//! let mut iter = tx.iterate(b"a")?;
//! while iter.is_valid() {
//!     println!("{:?} = {:?}", iter.key(), iter.value());
//!     iter.next()?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod bloom;
pub mod compaction;
pub mod db;
pub mod error;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod transaction;
pub mod types;
pub mod wal;

// Public re-exports for the top-level API
pub use db::{DB, Options, Snapshot, Stats};
pub use error::{Error, Result};
pub use iterator::{DbIterator, StorageIterator};
pub use transaction::{Transaction, TxState};
pub use wal::{BatchEntry, SyncPolicy};
