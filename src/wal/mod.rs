pub mod reader;
pub mod record;
pub mod writer;

pub use record::{BatchEntry, WALRecord};
pub use writer::{WALManager, WALWriter};

/// Controls when the WAL is fsync'd to disk.
///
/// Trade-off: durability vs throughput.
///   - EveryWrite: zero data loss, ~10x slower (each fsync waits for disk)
///   - EveryNWrites: batched durability, lose up to N commits on crash
///   - EveryNMillis: bounded loss window, much higher throughput
///
/// Every policy flushes the userspace buffer on each append, so a process
/// crash (as opposed to a power loss) never loses an acknowledged commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// fsync after every record. Safest, slowest.
    #[default]
    EveryWrite,
    /// fsync every N records. Batched durability.
    EveryNWrites(usize),
    /// fsync on the first append after N milliseconds since the last sync.
    EveryNMillis(u64),
}

