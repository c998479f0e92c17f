//! Storage Module
//!
//! Persistent storage layer: immutable segments plus the manifest that
//! commits them.
//!
//! ## Responsibilities
//! - Persist frozen MemTables as sorted segments
//! - Point lookups and range scans over memory-mapped segments
//! - Discover committed segments on startup and discard leftovers
//! - Allocate strictly increasing generation numbers
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── MANIFEST                 commit record (generations + sizes)
//!   ├── segment_000001.data      keys and values
//!   ├── segment_000001.index     2N+1 offsets
//!   ├── segment_000002.data
//!   └── segment_000002.index
//! ```

mod manager;
mod manifest;
mod segment;

use std::path::Path;

use crate::error::Result;

pub use manager::StorageManager;
pub use manifest::{Manifest, MANIFEST_FILENAME};
pub use segment::{
    data_path, index_path, parse_file_name, Segment, SegmentBuilder, SegmentFile, SegmentIter,
    SegmentMeta,
};

/// fsync a directory so renames inside it survive a crash
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    std::fs::File::open(dir)?.sync_all()?;
    Ok(())
}

/// Directories cannot be opened for syncing on this platform
#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
