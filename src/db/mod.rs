//! The storage engine: owns the WAL, the memtables, the segments and the
//! manifest, and runs flush and compaction.
//!
//! Write path:
//! 1. The commit lock is taken; tracked keys are checked for conflicts.
//! 2. The batch gets the next sequence number and is appended to the WAL.
//! 3. The batch is inserted into the active memtable.
//! 4. The sequence number is published; new snapshots now include the batch.
//! 5. A full memtable is frozen (WAL rotated) and a flush is scheduled.
//!
//! Read path: active memtable → frozen memtables (newest first) → segments
//! (newest first). The first version at or below the snapshot wins.

pub mod options;
pub mod recovery;
pub mod snapshot;
pub mod version;
mod worker;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

pub use options::{Options, Stats};
pub use snapshot::{Snapshot, SnapshotList};
pub use version::Version;

use crate::compaction::{self, COMPACTED_LEVEL, CompactionParams, retry_io};
use crate::error::{Error, Result};
use crate::manifest::{Manifest, SegmentRecord};
use crate::memtable::MemTable;
use crate::sstable::{SSTable, SSTableBuilder, SSTableMeta, list_segments, sst_path};
use crate::transaction::Transaction;
use crate::types::{Key, Lookup, SeqNum, Value};
use crate::wal::writer::{list_wals, wal_path};
use crate::wal::{BatchEntry, WALManager, WALRecord};
use worker::{Job, Worker};

/// Handle to an open database.
///
/// Cheap to clone; every clone shares the same engine. The engine shuts
/// down (flushing memtables to segments) on [`DB::close`] or when the last
/// handle and the last transaction are dropped.
#[derive(Clone)]
pub struct DB {
    inner: Arc<DbInner>,
}

pub(crate) struct DbInner {
    dir: PathBuf,
    options: Options,
    version: RwLock<Arc<Version>>,
    /// Serializes commits. Owns the active WAL.
    commit: Mutex<WALManager>,
    last_sequence: AtomicU64,
    snapshots: Arc<SnapshotList>,
    manifest: Mutex<Manifest>,
    /// Serializes flush and compaction jobs.
    maintenance: Mutex<()>,
    /// Reason the engine stopped accepting writes.
    read_only: Mutex<Option<String>>,
    /// Set when shutdown starts; rejects further commits.
    closed: AtomicBool,
    /// Set once shutdown completed. A failed shutdown can be retried.
    shut_down: Mutex<bool>,
    worker: Mutex<Option<Worker>>,
    flushes: AtomicU64,
    compactions: AtomicU64,
}

impl DB {
    /// Open the database in `path`, creating it if missing, and recover
    /// every commit acknowledged before the last shutdown or crash.
    ///
    /// Fails with [`Error::Corruption`] when the manifest or a listed
    /// segment is damaged.
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<DB> {
        let dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut manifest = Manifest::load(&dir)?.unwrap_or_default();

        let mut segments = Vec::with_capacity(manifest.segments.len());
        for record in &manifest.segments {
            segments.push(Arc::new(open_listed_segment(&dir, record)?));
        }
        segments.reverse();

        let live: HashSet<u64> = manifest.segments.iter().map(|s| s.id).collect();
        let mut max_file_id = None;
        for (id, path) in list_segments(&dir)? {
            max_file_id = max_file_id.max(Some(id));
            if !live.contains(&id) {
                warn!(path = %path.display(), "removing orphan segment");
                fs::remove_file(&path)?;
            }
        }
        let wals = list_wals(&dir)?;
        if let Some((id, _)) = wals.last() {
            max_file_id = max_file_id.max(Some(*id));
        }
        // WAL ids are allocated without persisting the counter.
        if let Some(id) = max_file_id {
            manifest.next_file_id = manifest.next_file_id.max(id + 1);
        }

        let mut last_sequence = segments
            .iter()
            .map(|s| s.meta().max_sequence)
            .fold(manifest.flushed_sequence, SeqNum::max);

        let recovered = MemTable::new(0, usize::MAX);
        for (_, path) in &wals {
            let stats = recovery::replay_wal(path, &recovered, manifest.flushed_sequence)?;
            last_sequence = last_sequence.max(stats.max_sequence);
        }
        if !recovered.is_empty() {
            let id = manifest.allocate_file_id();
            let path = sst_path(&dir, id);
            write_memtable(&recovered, &path, id, &options)?;
            segments.insert(0, Arc::new(SSTable::open(&path)?));
            manifest.segments.push(SegmentRecord { id, level: 0 });
            manifest.flushed_sequence = manifest.flushed_sequence.max(recovered.max_sequence());
            info!(
                entries = recovered.len(),
                wal_files = wals.len(),
                "recovered commits from WAL"
            );
        }

        let wal_id = manifest.allocate_file_id();
        manifest.store(&dir)?;
        for (_, path) in &wals {
            WALManager::delete_wal(path)?;
        }
        let wal = WALManager::new(&dir, wal_id, options.sync_policy)?;
        let active = Arc::new(MemTable::new(wal_id, options.memtable_size));

        let segment_count = segments.len();
        let inner = Arc::new(DbInner {
            dir,
            version: RwLock::new(Arc::new(Version::new(active, segments))),
            commit: Mutex::new(wal),
            last_sequence: AtomicU64::new(last_sequence),
            snapshots: Arc::new(SnapshotList::new()),
            manifest: Mutex::new(manifest),
            maintenance: Mutex::new(()),
            read_only: Mutex::new(None),
            closed: AtomicBool::new(false),
            shut_down: Mutex::new(false),
            worker: Mutex::new(None),
            flushes: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
            options,
        });
        if inner.options.background_work {
            let worker = Worker::spawn(Arc::downgrade(&inner))?;
            *inner.worker.lock() = Some(worker);
        }

        info!(
            path = %inner.dir.display(),
            segments = segment_count,
            last_sequence,
            "opened database"
        );
        if segment_count >= inner.options.compaction_trigger {
            inner.schedule(Job::Compact);
        }
        Ok(DB { inner })
    }

    /// Start a transaction reading at the latest committed state.
    pub fn begin(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.inner))
    }

    /// Pin the latest committed state for [`DB::get_at`].
    pub fn snapshot(&self) -> Snapshot {
        self.inner.snapshot()
    }

    /// Value of `key` as of `snapshot`.
    pub fn get_at(&self, key: &[u8], snapshot: &Snapshot) -> Result<Option<Value>> {
        self.inner.get(key, snapshot.sequence())
    }

    /// Value of `key` at the latest committed state.
    pub fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        let snapshot = self.inner.snapshot();
        self.inner.get(key, snapshot.sequence())
    }

    /// Write one key as its own committed batch.
    pub fn put(&self, key: Key, value: Value) -> Result<SeqNum> {
        self.apply(vec![BatchEntry::put(key, value)])
    }

    /// Delete one key as its own committed batch.
    pub fn delete(&self, key: Key) -> Result<SeqNum> {
        self.apply(vec![BatchEntry::delete(key)])
    }

    /// Commit `batch` atomically without conflict checks.
    ///
    /// When a key appears more than once, the last entry for it wins.
    /// Returns the batch's sequence number, or the current one for an empty
    /// batch.
    pub fn apply(&self, batch: Vec<BatchEntry>) -> Result<SeqNum> {
        self.inner.commit_batch(batch, None)
    }

    /// Freeze the active memtable and write every frozen memtable to a
    /// segment before returning.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    /// Merge all segments into one, dropping versions no live snapshot can
    /// read.
    pub fn compact(&self) -> Result<()> {
        self.inner.ensure_writable()?;
        self.inner.compact(1).map(|_| ()).inspect_err(|e| {
            self.inner.enter_read_only(format!("compaction failed: {e}"));
        })
    }

    /// Stop background work, flush memtables and sync the WAL.
    ///
    /// Further commits through any handle fail with
    /// [`Error::InvalidState`]; reads keep working.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    /// Sequence number of the newest committed batch (0 for none).
    pub fn last_sequence(&self) -> SeqNum {
        self.inner.last_sequence()
    }

    /// Whether background I/O failures disabled writes.
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only.lock().is_some()
    }

    pub fn path(&self) -> &Path {
        &self.inner.dir
    }

    pub fn stats(&self) -> Stats {
        let version = self.inner.current_version();
        Stats {
            last_sequence: self.inner.last_sequence(),
            active_memtable_bytes: version.active.size(),
            frozen_memtables: version.frozen.len(),
            segments: version.segments.len(),
            segment_bytes: version.segment_bytes(),
            segment_entries: version.segments.iter().map(|s| s.meta().entry_count).sum(),
            active_snapshots: self.inner.snapshots.len(),
            flushes: self.inner.flushes.load(Ordering::Relaxed),
            compactions: self.inner.compactions.load(Ordering::Relaxed),
            read_only: self.is_read_only(),
        }
    }
}

fn open_listed_segment(dir: &Path, record: &SegmentRecord) -> Result<SSTable> {
    let table = SSTable::open(&sst_path(dir, record.id)).map_err(|e| match e {
        Error::Io(err) if err.kind() == io::ErrorKind::NotFound => {
            Error::Corruption(format!("segment {} listed in manifest is missing", record.id))
        }
        other => other,
    })?;
    if table.meta().id != record.id {
        return Err(Error::Corruption(format!(
            "segment file {} holds segment {}",
            record.id,
            table.meta().id
        )));
    }
    Ok(table)
}

/// Collapse a batch to one entry per key, keeping the last. All entries
/// share one sequence number, so duplicates would otherwise be ordered by
/// value type instead of batch position.
fn last_write_per_key(entries: Vec<BatchEntry>) -> Vec<BatchEntry> {
    if entries.len() < 2 {
        return entries;
    }
    let mut latest: BTreeMap<Key, BatchEntry> = BTreeMap::new();
    for entry in entries {
        latest.insert(entry.key.clone(), entry);
    }
    latest.into_values().collect()
}

fn build_segment(memtable: &MemTable, path: &Path, id: u64, options: &Options) -> Result<SSTableMeta> {
    let mut builder = SSTableBuilder::new(path, id, options.block_size)?
        .with_bloom_false_positive_rate(options.bloom_false_positive_rate);
    memtable.scan(|key, value| builder.add(key, value))?;
    builder.finish()
}

/// Write a frozen memtable to a level-0 segment, removing the partial file
/// on failure.
fn write_memtable(memtable: &MemTable, path: &Path, id: u64, options: &Options) -> Result<SSTableMeta> {
    build_segment(memtable, path, id, options).inspect_err(|_| {
        let _ = fs::remove_file(path);
    })
}

impl DbInner {
    pub(crate) fn current_version(&self) -> Arc<Version> {
        Arc::clone(&self.version.read())
    }

    pub(crate) fn last_sequence(&self) -> SeqNum {
        self.last_sequence.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.snapshots.acquire(&self.last_sequence)
    }

    pub(crate) fn get(&self, key: &[u8], snapshot: SeqNum) -> Result<Option<Value>> {
        Ok(self
            .current_version()
            .get(key, snapshot)?
            .and_then(Lookup::into_value))
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::InvalidState("database is closed".into()));
        }
        if let Some(reason) = self.read_only.lock().as_ref() {
            return Err(Error::ReadOnly(reason.clone()));
        }
        Ok(())
    }

    fn enter_read_only(&self, reason: String) {
        let mut read_only = self.read_only.lock();
        if read_only.is_none() {
            error!(reason = %reason, "entering read-only mode");
            *read_only = Some(reason);
        }
    }

    /// Commit one batch.
    ///
    /// With `tracked = Some((keys, snapshot))`, fails with
    /// [`Error::Conflict`] if any of `keys` has a version newer than
    /// `snapshot`. The check and the apply happen under the same lock.
    /// A batch with no entries only runs the check, so it succeeds on a
    /// read-only or closed engine.
    pub(crate) fn commit_batch(
        &self,
        entries: Vec<BatchEntry>,
        tracked: Option<(&BTreeSet<Key>, SeqNum)>,
    ) -> Result<SeqNum> {
        let mut wal = self.commit.lock();

        if let Some((keys, snapshot)) = tracked {
            let version = self.current_version();
            for key in keys {
                if version.latest_sequence(key)?.is_some_and(|seq| seq > snapshot) {
                    debug!(snapshot, "write conflict");
                    return Err(Error::Conflict);
                }
            }
        }
        if entries.is_empty() {
            return Ok(self.last_sequence());
        }
        self.ensure_writable()?;

        let sequence = self.last_sequence() + 1;
        let record = WALRecord::batch(sequence, last_write_per_key(entries));
        if let Err(e) = wal.active_writer().append(&record) {
            self.enter_read_only(format!("WAL append failed: {e}"));
            return Err(e);
        }
        let version = self.current_version();
        version.active.apply(&record);
        self.last_sequence.store(sequence, Ordering::Release);

        let full = version.active.is_full();
        if full {
            // The batch is durable; a failed rotation only stops later writes.
            if let Err(e) = self.freeze(&mut wal) {
                self.enter_read_only(format!("WAL rotation failed: {e}"));
                return Ok(sequence);
            }
        }
        drop(wal);
        if full {
            self.schedule(Job::Flush);
        }
        Ok(sequence)
    }

    /// Swap in a fresh active memtable backed by a new WAL file.
    /// Caller holds the commit lock.
    fn freeze(&self, wal: &mut WALManager) -> Result<()> {
        let new_id = self.manifest.lock().allocate_file_id();
        wal.rotate(new_id)?;

        let mut slot = self.version.write();
        let current = Arc::clone(&slot);
        let mut frozen = Vec::with_capacity(current.frozen.len() + 1);
        frozen.push(Arc::clone(&current.active));
        frozen.extend(current.frozen.iter().cloned());
        *slot = Arc::new(Version {
            active: Arc::new(MemTable::new(new_id, self.options.memtable_size)),
            frozen,
            segments: current.segments.clone(),
        });
        debug!(
            frozen_id = current.active.id(),
            bytes = current.active.size(),
            "froze memtable"
        );
        Ok(())
    }

    fn schedule(&self, job: Job) {
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.schedule(job);
            return;
        }
        match job {
            Job::Flush => self.run_flush(),
            Job::Compact => self.run_compaction(),
            Job::Shutdown => {}
        }
    }

    /// Background flush entry point. Chains a compaction when the segment
    /// count reached the trigger.
    pub(crate) fn run_flush(&self) {
        if let Err(e) = self.flush_frozen() {
            self.enter_read_only(format!("flush failed: {e}"));
            return;
        }
        self.run_compaction();
    }

    /// Background compaction entry point.
    pub(crate) fn run_compaction(&self) {
        if self.read_only.lock().is_some() {
            return;
        }
        if let Err(e) = self.compact(self.options.compaction_trigger) {
            self.enter_read_only(format!("compaction failed: {e}"));
        }
    }

    fn flush(&self) -> Result<()> {
        {
            let mut wal = self.commit.lock();
            self.ensure_writable()?;
            if !self.current_version().active.is_empty() {
                self.freeze(&mut wal).inspect_err(|e| {
                    self.enter_read_only(format!("WAL rotation failed: {e}"));
                })?;
            }
        }
        self.flush_frozen().inspect_err(|e| {
            self.enter_read_only(format!("flush failed: {e}"));
        })?;
        if self.current_version().segments.len() >= self.options.compaction_trigger {
            self.schedule(Job::Compact);
        }
        Ok(())
    }

    /// Write every frozen memtable to a segment, oldest first.
    fn flush_frozen(&self) -> Result<()> {
        let _guard = self.maintenance.lock();
        loop {
            let Some(memtable) = self.current_version().frozen.last().cloned() else {
                return Ok(());
            };

            let segment = if memtable.is_empty() {
                None
            } else {
                let id = self.manifest.lock().allocate_file_id();
                let path = sst_path(&self.dir, id);
                retry_io("flush", self.options.max_io_retries, self.options.retry_backoff, || {
                    write_memtable(&memtable, &path, id, &self.options)
                })?;
                Some(Arc::new(SSTable::open(&path)?))
            };

            self.update_manifest(|manifest| {
                if let Some(segment) = &segment {
                    manifest.segments.push(SegmentRecord {
                        id: segment.meta().id,
                        level: 0,
                    });
                }
                manifest.flushed_sequence = manifest.flushed_sequence.max(memtable.max_sequence());
            })?;

            {
                let mut slot = self.version.write();
                let current = Arc::clone(&slot);
                let mut segments = Vec::with_capacity(current.segments.len() + 1);
                segments.extend(segment.iter().cloned());
                segments.extend(current.segments.iter().cloned());
                *slot = Arc::new(Version {
                    active: Arc::clone(&current.active),
                    frozen: current
                        .frozen
                        .iter()
                        .filter(|m| !Arc::ptr_eq(m, &memtable))
                        .cloned()
                        .collect(),
                    segments,
                });
            }

            if let Err(e) = WALManager::delete_wal(&wal_path(&self.dir, memtable.id())) {
                warn!(wal_id = memtable.id(), error = %e, "failed to delete flushed WAL");
            }
            self.flushes.fetch_add(1, Ordering::Relaxed);
            info!(
                wal_id = memtable.id(),
                segment_id = segment.as_ref().map(|s| s.meta().id),
                entries = memtable.len(),
                "flushed memtable"
            );
        }
    }

    /// Merge all segments into one when there are at least `min_inputs`.
    /// Returns whether a compaction ran.
    fn compact(&self, min_inputs: usize) -> Result<bool> {
        let _guard = self.maintenance.lock();
        let inputs = self.current_version().segments.clone();
        if inputs.is_empty() || inputs.len() < min_inputs {
            return Ok(false);
        }

        let watermark = self.snapshots.watermark(&self.last_sequence);
        let id = self.manifest.lock().allocate_file_id();
        let path = sst_path(&self.dir, id);
        let params = CompactionParams {
            block_size: self.options.block_size,
            bloom_false_positive_rate: self.options.bloom_false_positive_rate,
            watermark,
        };
        let output = retry_io(
            "compaction",
            self.options.max_io_retries,
            self.options.retry_backoff,
            || compaction::compact_segments(&inputs, &path, id, params),
        )?;
        let merged = match output.meta {
            Some(_) => Some(Arc::new(SSTable::open(&path)?)),
            None => None,
        };

        let input_ids: HashSet<u64> = inputs.iter().map(|s| s.meta().id).collect();
        self.update_manifest(|manifest| {
            manifest.segments.retain(|s| !input_ids.contains(&s.id));
            if merged.is_some() {
                manifest.segments.insert(
                    0,
                    SegmentRecord {
                        id,
                        level: COMPACTED_LEVEL,
                    },
                );
            }
        })?;

        {
            let mut slot = self.version.write();
            let current = Arc::clone(&slot);
            let mut segments: Vec<_> = current
                .segments
                .iter()
                .filter(|s| !input_ids.contains(&s.meta().id))
                .cloned()
                .collect();
            segments.extend(merged.iter().cloned());
            *slot = Arc::new(Version {
                active: Arc::clone(&current.active),
                frozen: current.frozen.clone(),
                segments,
            });
        }
        for input in &inputs {
            input.mark_obsolete();
        }

        self.compactions.fetch_add(1, Ordering::Relaxed);
        info!(
            inputs = inputs.len(),
            output = merged.as_ref().map(|s| s.meta().id),
            watermark,
            entries_read = output.entries_read,
            entries_dropped = output.entries_dropped,
            "compacted segments"
        );
        Ok(true)
    }

    /// Apply `change` to a copy of the manifest, persist it, then publish.
    fn update_manifest(&self, change: impl FnOnce(&mut Manifest)) -> Result<()> {
        let mut manifest = self.manifest.lock();
        let mut next = manifest.clone();
        change(&mut next);
        retry_io("manifest", self.options.max_io_retries, self.options.retry_backoff, || {
            next.store(&self.dir)
        })?;
        *manifest = next;
        Ok(())
    }

    /// Stop the worker and flush. Safe to call again after a failure; only
    /// a completed shutdown makes later calls no-ops.
    fn close(&self) -> Result<()> {
        let mut shut_down = self.shut_down.lock();
        if *shut_down {
            return Ok(());
        }
        self.closed.store(true, Ordering::Release);
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            worker.stop();
        }

        let degraded = self.read_only.lock().is_some();
        {
            let mut wal = self.commit.lock();
            if !degraded && !self.current_version().active.is_empty() {
                self.freeze(&mut wal)?;
            }
            wal.active_writer().sync()?;
        }
        if !degraded {
            self.flush_frozen()?;
        }
        *shut_down = true;
        info!(
            path = %self.dir.display(),
            last_sequence = self.last_sequence(),
            "closed database"
        );
        Ok(())
    }
}

impl Drop for DbInner {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.dir.display(), error = %e, "shutdown on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TxState;

    #[test]
    fn failed_wal_append_is_not_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let options = Options::default().with_background_work(false);
        {
            let db = DB::open(dir.path(), options.clone()).unwrap();
            db.put(b"kept".to_vec(), b"1".to_vec()).unwrap();

            db.inner.commit.lock().active_writer().fail_next_sync = true;
            let mut tx = db.begin();
            tx.put(b"lost".to_vec(), b"2".to_vec()).unwrap();
            assert!(matches!(tx.commit(), Err(Error::Io(_))));
            assert_eq!(tx.state(), TxState::RolledBack);
            assert!(db.is_read_only());
            assert_eq!(db.get(b"lost").unwrap(), None);
        }

        let db = DB::open(dir.path(), options).unwrap();
        assert_eq!(db.get(b"kept").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get(b"lost").unwrap(), None);
        assert_eq!(db.last_sequence(), 1);
    }

    #[test]
    fn duplicate_keys_collapse_to_last_entry() {
        let batch = vec![
            BatchEntry::put(b"k".to_vec(), b"1".to_vec()),
            BatchEntry::put(b"a".to_vec(), b"x".to_vec()),
            BatchEntry::delete(b"k".to_vec()),
        ];
        let collapsed = last_write_per_key(batch);
        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].key, b"a".to_vec());
        assert!(collapsed[1].value_type.is_delete());
    }
}
