//! Durable record of which segments make up the database.
//!
//! The manifest is rewritten wholesale on every flush and compaction:
//! write `MANIFEST.tmp`, fsync, rename over `MANIFEST`, fsync the directory.
//! A segment file that is not listed here is garbage from an interrupted
//! flush or compaction and is deleted on open.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::types::SeqNum;

pub const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TMP_FILE: &str = "MANIFEST.tmp";

const CRC_SIZE: usize = 4;
const LEN_SIZE: usize = 4;

/// One live segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRecord {
    pub id: u64,
    pub level: u32,
}

/// Engine state that must survive a restart besides the WAL.
///
/// On-disk format:
/// ```text
/// [crc(4B)][len(4B)][next_file_id(8B)][flushed_sequence(8B)][count(4B)]
/// { [id(8B)][level(4B)] } * count
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Next id for a WAL or segment file.
    pub next_file_id: u64,
    /// Every commit with a sequence at or below this is in a segment.
    pub flushed_sequence: SeqNum,
    /// Live segments, oldest first.
    pub segments: Vec<SegmentRecord>,
}

impl Manifest {
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(20 + self.segments.len() * 12);
        payload.extend_from_slice(&self.next_file_id.to_le_bytes());
        payload.extend_from_slice(&self.flushed_sequence.to_le_bytes());
        payload.extend_from_slice(&(self.segments.len() as u32).to_le_bytes());
        for segment in &self.segments {
            payload.extend_from_slice(&segment.id.to_le_bytes());
            payload.extend_from_slice(&segment.level.to_le_bytes());
        }

        let mut buf = Vec::with_capacity(CRC_SIZE + LEN_SIZE + payload.len());
        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let corrupt = |msg: &str| Error::Corruption(format!("manifest: {msg}"));

        if data.len() < CRC_SIZE + LEN_SIZE {
            return Err(corrupt("too short"));
        }
        let stored_crc = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        if data.len() != CRC_SIZE + LEN_SIZE + len {
            return Err(corrupt("length mismatch"));
        }
        if crc32fast::hash(&data[CRC_SIZE..]) != stored_crc {
            return Err(corrupt("CRC mismatch"));
        }

        let payload = &data[CRC_SIZE + LEN_SIZE..];
        if payload.len() < 20 {
            return Err(corrupt("payload too short"));
        }
        let u64_at = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&payload[at..at + 8]);
            u64::from_le_bytes(buf)
        };
        let u32_at = |at: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&payload[at..at + 4]);
            u32::from_le_bytes(buf)
        };

        let next_file_id = u64_at(0);
        let flushed_sequence = u64_at(8);
        let count = u32_at(16) as usize;
        if payload.len() != 20 + count * 12 {
            return Err(corrupt("segment list size mismatch"));
        }

        let segments = (0..count)
            .map(|i| {
                let at = 20 + i * 12;
                SegmentRecord {
                    id: u64_at(at),
                    level: u32_at(at + 8),
                }
            })
            .collect();

        Ok(Manifest {
            next_file_id,
            flushed_sequence,
            segments,
        })
    }

    /// Load the manifest from `dir`, or `None` for a fresh directory.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        match fs::read(&path) {
            Ok(data) => Self::decode(&data).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the manifest in `dir`.
    pub fn store(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(MANIFEST_TMP_FILE);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&self.encode())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        sync_dir(dir)?;
        debug!(
            segments = self.segments.len(),
            flushed_sequence = self.flushed_sequence,
            "stored manifest"
        );
        Ok(())
    }

    /// Hand out a fresh file id.
    pub fn allocate_file_id(&mut self) -> u64 {
        let id = self.next_file_id;
        self.next_file_id += 1;
        id
    }
}

/// fsync a directory so renames and file creations inside it are durable.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
