use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::Result;
use crate::wal::record::WALRecord;
use crate::wal::SyncPolicy;

/// File extension of write-ahead log files.
pub const WAL_EXTENSION: &str = "wal";

/// Writes WAL records to a file on disk.
///
/// A commit is acknowledged only after its record reached the OS; whether it
/// also reached the disk depends on the [`SyncPolicy`]. On restart, replaying
/// the WAL reconstructs the memtable.
///
/// Two layers of buffering:
///   BufWriter.flush()  → Rust buffer → OS page cache
///   file.sync_all()    → OS page cache → physical disk
pub struct WALWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    offset: u64,
    sync_policy: SyncPolicy,
    writes_since_sync: usize,
    last_sync: Instant,
    #[cfg(test)]
    pub(crate) fail_next_sync: bool,
}

impl WALWriter {
    /// Create a new WAL writer at the given path.
    pub fn new(path: &Path, sync_policy: SyncPolicy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = file.metadata()?.len();

        Ok(WALWriter {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            offset,
            sync_policy,
            writes_since_sync: 0,
            last_sync: Instant::now(),
            #[cfg(test)]
            fail_next_sync: false,
        })
    }

    /// Append a record to the WAL.
    /// Depending on SyncPolicy, may fsync after this write.
    ///
    /// On failure the file is cut back to where the record started, so a
    /// commit reported as failed is never replayed.
    pub fn append(&mut self, record: &WALRecord) -> Result<()> {
        let start = self.offset;
        match self.write_record(record) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.discard_from(start);
                Err(e)
            }
        }
    }

    fn write_record(&mut self, record: &WALRecord) -> Result<()> {
        let encoded = record.encode();

        self.writer.write_all(&encoded)?;
        self.writer.flush()?;
        self.offset += encoded.len() as u64;
        self.writes_since_sync += 1;

        let due = match self.sync_policy {
            SyncPolicy::EveryWrite => true,
            SyncPolicy::EveryNWrites(n) => self.writes_since_sync >= n,
            SyncPolicy::EveryNMillis(ms) => self.last_sync.elapsed() >= Duration::from_millis(ms),
        };
        if due {
            self.sync()?;
        }

        Ok(())
    }

    /// Force fsync to disk. Ensures all buffered writes are durable.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        #[cfg(test)]
        if mem::take(&mut self.fail_next_sync) {
            return Err(std::io::Error::other("fsync failed").into());
        }
        self.writer.get_ref().sync_all()?;
        self.writes_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Drop everything past `offset`: bytes still buffered and bytes already
    /// handed to the OS.
    fn discard_from(&mut self, offset: u64) {
        let fresh = match self.writer.get_ref().try_clone() {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot reopen WAL after failed append");
                return;
            }
        };
        let (file, _unwritten) = mem::replace(&mut self.writer, BufWriter::new(fresh)).into_parts();
        if let Err(e) = file.set_len(offset).and_then(|()| file.sync_all()) {
            warn!(path = %self.path.display(), offset, error = %e, "cannot truncate WAL after failed append");
        }
        self.offset = offset;
    }

    /// Current file offset (bytes written so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Records appended since the last fsync.
    pub fn writes_since_sync(&self) -> usize {
        self.writes_since_sync
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Path of WAL file `id` inside `dir`.
pub fn wal_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id:06}.{WAL_EXTENSION}"))
}

/// All WAL files in `dir`, sorted by id.
pub fn list_wals(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut wals = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == WAL_EXTENSION) {
            let id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok());
            if let Some(id) = id {
                wals.push((id, path));
            }
        }
    }
    wals.sort_by_key(|(id, _)| *id);
    Ok(wals)
}

/// Manages WAL file rotation.
///
/// When a memtable is frozen for flushing:
/// 1. Create new WAL for the new active memtable
/// 2. Keep old WAL until its SSTable is durable and recorded in the manifest
/// 3. Delete old WAL
///
/// Old WAL is only deleted AFTER its SSTable is fully written and fsync'd.
/// File ids are handed in by the caller, which shares one id counter between
/// WAL and segment files.
pub struct WALManager {
    dir: PathBuf,
    active_writer: WALWriter,
    active_id: u64,
    sync_policy: SyncPolicy,
}

impl WALManager {
    /// Create a WAL manager for the given directory whose active file is
    /// `wal_id`.
    pub fn new(dir: &Path, wal_id: u64, sync_policy: SyncPolicy) -> Result<Self> {
        let active_writer = WALWriter::new(&wal_path(dir, wal_id), sync_policy)?;
        Ok(WALManager {
            dir: dir.to_path_buf(),
            active_writer,
            active_id: wal_id,
            sync_policy,
        })
    }

    /// Rotate: freeze current WAL, create a new one with id `new_id`.
    /// Returns the path of the old WAL (caller deletes after SSTable flush).
    pub fn rotate(&mut self, new_id: u64) -> Result<PathBuf> {
        self.active_writer.sync()?;
        let writer = WALWriter::new(&wal_path(&self.dir, new_id), self.sync_policy)?;
        let old = std::mem::replace(&mut self.active_writer, writer);
        debug!(old = %old.path().display(), new_id, "rotated WAL");
        self.active_id = new_id;
        Ok(old.path().to_path_buf())
    }

    /// Delete an old WAL file (safe only after SSTable is fsync'd).
    pub fn delete_wal(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn active_writer(&mut self) -> &mut WALWriter {
        &mut self.active_writer
    }

    pub fn active_path(&self) -> &Path {
        self.active_writer.path()
    }

    pub fn active_id(&self) -> u64 {
        self.active_id
    }
}
