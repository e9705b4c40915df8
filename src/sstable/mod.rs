//! Sorted, immutable on-disk segments.
//!
//! File layout:
//! ```text
//! [data block + crc] ... [data block + crc]
//! [index block + crc] [meta block + crc] [bloom block + crc] [footer]
//! ```

pub mod block;
pub mod builder;
pub mod footer;
pub mod iterator;
pub mod reader;

use std::fs;
use std::path::{Path, PathBuf};

pub use builder::SSTableBuilder;
pub use footer::SSTableMeta;
pub use iterator::SSTableIterator;
pub use reader::SSTable;

use crate::error::Result;

/// File extension of segment files.
pub const SST_EXTENSION: &str = "sst";

/// Path of segment file `id` inside `dir`.
pub fn sst_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id:06}.{SST_EXTENSION}"))
}

/// All segment files in `dir` as (id, path), sorted by id.
pub fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == SST_EXTENSION) {
            let id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok());
            if let Some(id) = id {
                segments.push((id, path));
            }
        }
    }
    segments.sort_by_key(|(id, _)| *id);
    Ok(segments)
}
