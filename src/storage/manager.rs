//! Storage Manager
//!
//! Owns the on-disk side of the engine.
//!
//! ## Responsibilities
//! - Validate the data directory and discover committed segments on startup
//! - Remove leftovers of interrupted writes
//! - Allocate generation numbers
//! - Build new segments and commit segment lists through the manifest

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::types::Entry;
use crate::StrataError;

use super::manifest::Manifest;
use super::segment::{
    data_path, index_path, parse_file_name, Segment, SegmentBuilder, SegmentFile, TMP_EXT,
};

/// Manages the storage layer
///
/// ## Concurrency:
/// - `next_generation`: atomic counter (lock-free)
/// - `build_segment` may run concurrently with any reader
/// - `commit` must be serialized by the caller (the engine's maintenance lock)
pub struct StorageManager {
    /// Directory where segments and the manifest live
    data_dir: PathBuf,

    /// fsync files and directory entries before committing
    sync_writes: bool,

    /// Next generation to hand out
    next_generation: AtomicU64,
}

/// Which files of one generation were found on disk
#[derive(Default)]
struct FoundFiles {
    data: bool,
    index: bool,
}

impl StorageManager {
    /// Open storage in `config.data_dir`
    ///
    /// Returns the manager and the committed segments, newest first.
    ///
    /// On startup:
    /// 1. Check (or create) the directory
    /// 2. Remove temporary files of interrupted writes
    /// 3. Load the manifest; without one, discover segments by file name
    /// 4. Open every committed segment, remove uncommitted ones
    /// 5. Resume generations after the highest one ever seen
    pub fn open(config: &Config) -> Result<(Self, Vec<Arc<Segment>>)> {
        let dir = config.data_dir.as_path();
        Self::prepare_dir(dir, config.create_if_missing)?;

        let found = Self::scan_dir(dir)?;
        let highest_on_disk = found.keys().next_back().copied().unwrap_or(0);

        let (segments, manifest_next) = match Manifest::load(dir)? {
            Some(manifest) => {
                let segments = Self::open_committed(dir, &manifest, config.verify_checksums)?;
                Self::remove_uncommitted(dir, &manifest, &found);
                (segments, manifest.next_generation)
            }
            None => {
                let segments = Self::open_discovered(dir, &found, config.verify_checksums)?;
                (segments, 0)
            }
        };

        let next_generation = manifest_next.max(highest_on_disk + 1).max(1);
        let manager = Self {
            data_dir: dir.to_path_buf(),
            sync_writes: config.sync_writes,
            next_generation: AtomicU64::new(next_generation),
        };

        // Rewrite the manifest so it exists and reflects the resumed counter
        let mut newest_first: Vec<Arc<Segment>> = segments.into_iter().map(Arc::new).collect();
        newest_first.reverse();
        manager.commit(&newest_first)?;

        tracing::info!(
            data_dir = %dir.display(),
            segments = newest_first.len(),
            next_generation,
            "storage opened"
        );

        Ok((manager, newest_first))
    }

    fn prepare_dir(dir: &Path, create_if_missing: bool) -> Result<()> {
        match fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StrataError::Init(format!(
                "{} is not a directory",
                dir.display()
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound && create_if_missing => {
                fs::create_dir_all(dir)?;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StrataError::Init(format!(
                "data directory {} does not exist",
                dir.display()
            ))),
            Err(e) => Err(StrataError::Init(format!(
                "data directory {} is unusable: {}",
                dir.display(),
                e
            ))),
        }
    }

    /// Collect segment files by generation; deletes `.tmp` leftovers
    fn scan_dir(dir: &Path) -> Result<BTreeMap<u64, FoundFiles>> {
        let mut found: BTreeMap<u64, FoundFiles> = BTreeMap::new();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            if path.extension().and_then(|e| e.to_str()) == Some(TMP_EXT) {
                tracing::warn!(path = %path.display(), "removing leftover temporary file");
                fs::remove_file(&path)?;
                continue;
            }

            if let Some((generation, kind)) = parse_file_name(&path) {
                let files = found.entry(generation).or_default();
                match kind {
                    SegmentFile::Data => files.data = true,
                    SegmentFile::Index => files.index = true,
                }
            }
        }

        Ok(found)
    }

    /// Open the segments listed in the manifest, oldest first
    fn open_committed(dir: &Path, manifest: &Manifest, verify: bool) -> Result<Vec<Segment>> {
        let mut segments = Vec::with_capacity(manifest.segments.len());
        for meta in &manifest.segments {
            let segment = Segment::open(dir, meta.generation, Some(meta), verify)
                .map_err(|e| Self::missing_as_init(meta.generation, e))?;
            segments.push(segment);
        }
        Ok(segments)
    }

    /// Open every complete segment found by name, oldest first
    fn open_discovered(
        dir: &Path,
        found: &BTreeMap<u64, FoundFiles>,
        verify: bool,
    ) -> Result<Vec<Segment>> {
        let mut segments = Vec::with_capacity(found.len());
        for (&generation, files) in found {
            if !(files.data && files.index) {
                let missing = if files.data { "index" } else { "data" };
                return Err(StrataError::corrupt(
                    generation,
                    format!("{} file is missing", missing),
                ));
            }
            let segment = Segment::open(dir, generation, None, verify)
                .map_err(|e| Self::missing_as_init(generation, e))?;
            segments.push(segment);
        }
        if !segments.is_empty() {
            tracing::info!(
                segments = segments.len(),
                "no manifest found, segments discovered by file name"
            );
        }
        Ok(segments)
    }

    /// Segment files left behind by a flush that never committed, or by a
    /// compaction whose cleanup was interrupted
    fn remove_uncommitted(dir: &Path, manifest: &Manifest, found: &BTreeMap<u64, FoundFiles>) {
        for &generation in found.keys() {
            if manifest.segments.iter().any(|m| m.generation == generation) {
                continue;
            }
            tracing::warn!(generation, "removing uncommitted segment files");
            for path in [data_path(dir, generation), index_path(dir, generation)] {
                if let Err(e) = fs::remove_file(&path) {
                    if e.kind() != ErrorKind::NotFound {
                        tracing::warn!(path = %path.display(), error = %e, "failed to remove file");
                    }
                }
            }
        }
    }

    fn missing_as_init(generation: u64, error: StrataError) -> StrataError {
        match error {
            StrataError::Io(e) if e.kind() == ErrorKind::NotFound => StrataError::Init(format!(
                "segment {} is committed but its files are missing",
                generation
            )),
            other => other,
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Hand out the next generation number
    pub fn allocate_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    /// Write `entries` (ascending, unique keys) as a new segment
    ///
    /// Returns `None` when `entries` is empty; nothing is left on disk then.
    /// The segment is not committed until it is listed by [`Self::commit`].
    pub fn build_segment(
        &self,
        entries: impl IntoIterator<Item = Entry>,
    ) -> Result<Option<Arc<Segment>>> {
        let generation = self.allocate_generation();
        let mut builder = SegmentBuilder::new(&self.data_dir, generation, self.sync_writes)?;
        builder.add_all(entries)?;

        let Some(meta) = builder.finish()? else {
            return Ok(None);
        };

        match Segment::open(&self.data_dir, generation, Some(&meta), false) {
            Ok(segment) => Ok(Some(Arc::new(segment))),
            Err(e) => {
                let _ = fs::remove_file(data_path(&self.data_dir, generation));
                let _ = fs::remove_file(index_path(&self.data_dir, generation));
                Err(e)
            }
        }
    }

    /// Commit `segments` (newest first) as the complete live segment list
    ///
    /// On error the previously committed list is still the one on disk, so
    /// a segment built for this commit may be discarded.
    pub fn commit(&self, segments: &[Arc<Segment>]) -> Result<()> {
        let metas = segments.iter().rev().map(|s| s.meta()).collect();
        Manifest::new(self.next_generation(), metas).store(&self.data_dir, self.sync_writes)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next generation number (for testing/debugging)
    pub fn next_generation(&self) -> u64 {
        self.next_generation.load(Ordering::SeqCst)
    }
}
