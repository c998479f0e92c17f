//! Segment Module
//!
//! Immutable on-disk sorted run of entries, split over two files.
//!
//! ## File Format
//! ```text
//! segment_000042.data
//! ┌────────┬──────────┬────────┬──────────┬─────┬────────┬──────────┐
//! │ Key 0  │ Value 0  │ Key 1  │ Value 1  │ ... │ Key N-1│ Value N-1│
//! └────────┴──────────┴────────┴──────────┴─────┴────────┴──────────┘
//!   (raw bytes, ascending key order, tombstones have no value bytes)
//!
//! segment_000042.index
//! ┌──────────┬──────────┬──────────┬──────────┬─────┬──────────┐
//! │ off[0]=0 │ off[1]   │ off[2]   │ off[3]   │ ... │ off[2N]  │
//! └──────────┴──────────┴──────────┴──────────┴─────┴──────────┘
//!   (2N+1 little-endian u64)
//!   off[2i]   start of key i
//!   off[2i+1] end of key i / start of value i; bit 63 set = tombstone
//!   off[2i+2] end of value i (== data length for the last entry)
//! ```

mod builder;
mod iterator;
mod reader;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use builder::SegmentBuilder;
pub use iterator::SegmentIter;
pub use reader::Segment;

// =============================================================================
// Shared Constants (used by builder, reader, manager)
// =============================================================================

/// Set on a key/value boundary offset when the entry is a tombstone
pub(crate) const TOMBSTONE_FLAG: u64 = 1 << 63;

/// Mask recovering the byte offset from a flagged boundary
pub(crate) const OFFSET_MASK: u64 = !TOMBSTONE_FLAG;

/// Width of one index slot
pub(crate) const OFFSET_SIZE: usize = 8;

pub(crate) const FILE_PREFIX: &str = "segment_";
pub(crate) const DATA_EXT: &str = "data";
pub(crate) const INDEX_EXT: &str = "index";
pub(crate) const TMP_EXT: &str = "tmp";

// =============================================================================
// Segment Metadata
// =============================================================================

/// Description of a committed segment, as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Recency order; higher is newer
    pub generation: u64,
    /// Number of entries, tombstones included
    pub entry_count: u64,
    /// Size of the data file in bytes
    pub data_len: u64,
    /// Size of the index file in bytes
    pub index_len: u64,
    /// CRC32 of the data file, when known
    pub data_crc: Option<u32>,
}

// =============================================================================
// File Naming
// =============================================================================

/// "segment_000042.data"
pub fn data_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("{}{:06}.{}", FILE_PREFIX, generation, DATA_EXT))
}

/// "segment_000042.index"
pub fn index_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("{}{:06}.{}", FILE_PREFIX, generation, INDEX_EXT))
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(TMP_EXT);
    PathBuf::from(name)
}

/// Which half of a segment a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFile {
    Data,
    Index,
}

/// Parse a segment file name
/// "segment_000042.index" → Some((42, Index))
pub fn parse_file_name(path: &Path) -> Option<(u64, SegmentFile)> {
    let kind = match path.extension()?.to_str()? {
        DATA_EXT => SegmentFile::Data,
        INDEX_EXT => SegmentFile::Index,
        _ => return None,
    };
    let stem = path.file_stem()?.to_str()?;
    let generation = stem.strip_prefix(FILE_PREFIX)?.parse().ok()?;
    Some((generation, kind))
}
