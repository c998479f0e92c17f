//! Segment Reader
//!
//! Maps both segment files read-only and answers lookups by binary search
//! over the offset index, slicing keys straight out of the mapped data.

use std::cmp::Ordering;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;

use crate::error::Result;
use crate::types::{compare_keys, Entry, KeyRange};
use crate::StrataError;

use super::iterator::SegmentIter;
use super::{data_path, index_path, SegmentMeta, OFFSET_MASK, OFFSET_SIZE, TOMBSTONE_FLAG};

/// An open, immutable segment
///
/// `data` and `index` are views over the mapped files; slices handed out
/// share ownership of the mapping.
pub struct Segment {
    generation: u64,
    data_path: PathBuf,
    index_path: PathBuf,
    data: Bytes,
    index: Bytes,
    entry_count: usize,
    data_crc: Option<u32>,
    /// Set once a compaction has replaced this segment; files are removed on drop
    obsolete: AtomicBool,
}

impl Segment {
    /// Open the segment `generation` inside `dir`
    ///
    /// `expected` is the manifest's record of the segment; sizes, entry count
    /// and checksum are checked against it. With `verify_checksum` the data
    /// checksum is recomputed and key order is checked.
    pub fn open(
        dir: &Path,
        generation: u64,
        expected: Option<&SegmentMeta>,
        verify_checksum: bool,
    ) -> Result<Self> {
        let data_path = data_path(dir, generation);
        let index_path = index_path(dir, generation);

        let data = map_file(&data_path)?;
        let index = map_file(&index_path)?;

        let entry_count = validate_index(generation, &index, data.len() as u64)?;

        let mut segment = Self {
            generation,
            data_path,
            index_path,
            data,
            index,
            entry_count,
            data_crc: expected.and_then(|meta| meta.data_crc),
            obsolete: AtomicBool::new(false),
        };

        if let Some(meta) = expected {
            segment.check_against(meta)?;
        }

        if verify_checksum {
            let actual = crc32fast::hash(&segment.data);
            if let Some(recorded) = segment.data_crc {
                if recorded != actual {
                    return Err(StrataError::corrupt(
                        generation,
                        format!("data checksum {:08x}, expected {:08x}", actual, recorded),
                    ));
                }
            }
            segment.data_crc = Some(actual);
            segment.check_key_order()?;
        }

        Ok(segment)
    }

    fn check_against(&self, meta: &SegmentMeta) -> Result<()> {
        if meta.generation != self.generation
            || meta.data_len != self.data.len() as u64
            || meta.index_len != self.index.len() as u64
            || meta.entry_count != self.entry_count as u64
        {
            return Err(StrataError::corrupt(
                self.generation,
                format!(
                    "on disk: {} entries, data {} bytes, index {} bytes; manifest: {} entries, data {} bytes, index {} bytes",
                    self.entry_count,
                    self.data.len(),
                    self.index.len(),
                    meta.entry_count,
                    meta.data_len,
                    meta.index_len
                ),
            ));
        }
        Ok(())
    }

    fn check_key_order(&self) -> Result<()> {
        for i in 1..self.entry_count {
            if compare_keys(self.key_at(i - 1), self.key_at(i)) != Ordering::Less {
                return Err(StrataError::corrupt(
                    self.generation,
                    format!("keys out of order at entry {}", i),
                ));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Point lookup; a tombstone comes back as an entry without value
    pub fn find(&self, key: &[u8]) -> Option<Entry> {
        self.search(key).ok().map(|i| self.entry_at(i))
    }

    /// Lazy ascending cursor over `range`
    pub fn range(self: &Arc<Self>, range: &KeyRange) -> SegmentIter {
        let start = range.from.as_ref().map_or(0, |from| self.lower_bound(from));
        let end = range
            .to
            .as_ref()
            .map_or(self.entry_count, |to| self.lower_bound(to));
        SegmentIter::new(Arc::clone(self), start, end.max(start))
    }

    /// Binary search over entry positions
    fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        let (mut lo, mut hi) = (0, self.entry_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match compare_keys(self.key_at(mid), key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// Position of the first entry whose key is >= `key`
    fn lower_bound(&self, key: &[u8]) -> usize {
        match self.search(key) {
            Ok(i) | Err(i) => i,
        }
    }

    // =========================================================================
    // Positional access (offsets were validated at open)
    // =========================================================================

    fn offset(&self, slot: usize) -> u64 {
        read_offset(&self.index, slot)
    }

    fn key_bounds(&self, i: usize) -> (usize, usize) {
        let start = self.offset(2 * i) as usize;
        let end = (self.offset(2 * i + 1) & OFFSET_MASK) as usize;
        (start, end)
    }

    fn key_at(&self, i: usize) -> &[u8] {
        let (start, end) = self.key_bounds(i);
        &self.data[start..end]
    }

    pub(super) fn entry_at(&self, i: usize) -> Entry {
        let (key_start, key_end) = self.key_bounds(i);
        let key = self.data.slice(key_start..key_end);
        if self.offset(2 * i + 1) & TOMBSTONE_FLAG != 0 {
            return Entry::tombstone(key);
        }
        let value_end = self.offset(2 * i + 2) as usize;
        Entry::new(key, Some(self.data.slice(key_end..value_end)))
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn data_len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn index_len(&self) -> u64 {
        self.index.len() as u64
    }

    pub fn meta(&self) -> SegmentMeta {
        SegmentMeta {
            generation: self.generation,
            entry_count: self.entry_count as u64,
            data_len: self.data_len(),
            index_len: self.index_len(),
            data_crc: self.data_crc,
        }
    }

    pub fn paths(&self) -> (&Path, &Path) {
        (self.data_path.as_path(), self.index_path.as_path())
    }

    /// Schedule file removal for when the last reference is dropped
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, AtomicOrdering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(AtomicOrdering::Acquire)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        for path in [&self.data_path, &self.index_path] {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        generation = self.generation,
                        path = %path.display(),
                        error = %e,
                        "failed to remove obsolete segment file"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("generation", &self.generation)
            .field("entry_count", &self.entry_count)
            .field("data_len", &self.data.len())
            .field("obsolete", &self.is_obsolete())
            .finish()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Map a file read-only; empty files are not mapped
fn map_file(path: &Path) -> Result<Bytes> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(Bytes::new());
    }
    // SAFETY: segment files are never written after they are renamed into
    // place, and the data directory is owned by a single engine.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(Bytes::from_owner(mmap))
}

fn read_offset(index: &[u8], slot: usize) -> u64 {
    let start = slot * OFFSET_SIZE;
    let mut buf = [0u8; OFFSET_SIZE];
    buf.copy_from_slice(&index[start..start + OFFSET_SIZE]);
    u64::from_le_bytes(buf)
}

/// Check index shape and offsets against the data length; returns entry count
fn validate_index(generation: u64, index: &[u8], data_len: u64) -> Result<usize> {
    if index.len() % OFFSET_SIZE != 0 {
        return Err(StrataError::corrupt(
            generation,
            format!("index length {} is not a multiple of {}", index.len(), OFFSET_SIZE),
        ));
    }
    let slots = index.len() / OFFSET_SIZE;
    if slots % 2 == 0 {
        return Err(StrataError::corrupt(
            generation,
            format!("index holds {} offsets, expected 2N+1", slots),
        ));
    }
    if read_offset(index, 0) != 0 {
        return Err(StrataError::corrupt(generation, "first offset is not zero"));
    }

    let mut previous = 0u64;
    for slot in 1..slots {
        let raw = read_offset(index, slot);
        let is_boundary = slot % 2 == 1;
        if !is_boundary && raw & TOMBSTONE_FLAG != 0 {
            return Err(StrataError::corrupt(
                generation,
                format!("tombstone flag outside a key/value boundary at offset {}", slot),
            ));
        }
        let offset = raw & OFFSET_MASK;
        if offset < previous {
            return Err(StrataError::corrupt(
                generation,
                format!("offset {} decreases ({} < {})", slot, offset, previous),
            ));
        }
        if is_boundary && raw & TOMBSTONE_FLAG != 0 && read_offset(index, slot + 1) != offset {
            return Err(StrataError::corrupt(
                generation,
                format!("tombstone at entry {} carries value bytes", slot / 2),
            ));
        }
        previous = offset;
    }

    if previous != data_len {
        return Err(StrataError::corrupt(
            generation,
            format!("index ends at {}, data file holds {} bytes", previous, data_len),
        ));
    }

    Ok(slots / 2)
}
