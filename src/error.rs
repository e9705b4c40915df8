use std::io;

use thiserror::Error;

/// Unified error type for the storage engine.
///
/// A missing key is not an error: lookups return `Option::None`.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error from disk operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption detected (CRC mismatch, bad format, etc).
    #[error("Corruption: {0}")]
    Corruption(String),

    /// Another transaction committed a tracked key after our snapshot.
    /// The transaction has been rolled back; retry it.
    #[error("Transaction conflict")]
    Conflict,

    /// Operation on a transaction that is no longer active.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The engine gave up on background I/O and no longer accepts writes.
    #[error("Engine is read-only: {0}")]
    ReadOnly(String),
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
