//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Route writes into the active MemTable
//! - Answer reads from MemTables and segments, newest first
//! - Freeze and flush MemTables into segments
//! - Compact everything into a single segment
//! - Close idempotently, releasing every mapped file

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::Result;
use crate::iterator::{MergeIterator, SortedSource};
use crate::memtable::MemTable;
use crate::storage::{Segment, StorageManager};
use crate::types::{Entry, KeyRange};
use crate::StrataError;

/// Everything a reader needs, published as one immutable snapshot
#[derive(Clone)]
struct LsmState {
    /// Receives all writes
    memtable: Arc<MemTable>,
    /// Frozen MemTables waiting for their segment, newest first
    frozen: Vec<Arc<MemTable>>,
    /// Committed segments, newest first
    segments: Vec<Arc<Segment>>,
}

impl LsmState {
    fn new(segments: Vec<Arc<Segment>>) -> Self {
        Self {
            memtable: Arc::new(MemTable::new()),
            frozen: Vec::new(),
            segments,
        }
    }

    /// Point lookup in recency order; `Some` for values and tombstones
    fn find(&self, key: &[u8]) -> Option<Entry> {
        if let Some(entry) = self.memtable.get(key) {
            return Some(entry);
        }
        for table in &self.frozen {
            if let Some(entry) = table.get(key) {
                return Some(entry);
            }
        }
        self.segments.iter().find_map(|segment| segment.find(key))
    }

    /// Range sources in recency order
    fn sources(&self, range: &KeyRange) -> Vec<Box<dyn SortedSource>> {
        let mut sources: Vec<Box<dyn SortedSource>> =
            Vec::with_capacity(1 + self.frozen.len() + self.segments.len());
        sources.push(Box::new(self.memtable.range(range)));
        for table in &self.frozen {
            sources.push(Box::new(table.range(range)));
        }
        for segment in &self.segments {
            sources.push(Box::new(segment.range(range)));
        }
        sources
    }
}

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Reads** (get/range): clone the current `Arc<LsmState>` under a brief
///   read lock and work on that snapshot. Range iterators keep their
///   snapshot alive, so segments they use are never deleted under them.
///
/// - **Writes** (upsert/put/delete): insert into the active MemTable while
///   holding the state read lock. Many writers proceed in parallel.
///
/// - **Maintenance** (flush/compact/close): serialized by
///   `maintenance_lock`. Freezing the MemTable takes the state write lock,
///   which waits only for in-flight inserts. Segment I/O runs without the
///   state lock; the result is published by swapping in a new snapshot.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Segment files, generations and the manifest
    storage: StorageManager,

    /// Current snapshot of MemTables and segments
    state: RwLock<Arc<LsmState>>,

    /// One flush or compaction at a time
    maintenance_lock: Mutex<()>,

    /// Set by the first `close()`
    closed: AtomicBool,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open storage (validates the directory, loads committed segments)
    /// 2. Start with an empty MemTable
    pub fn open(config: Config) -> Result<Self> {
        let (storage, segments) = StorageManager::open(&config)?;

        Ok(Self {
            config,
            storage,
            state: RwLock::new(Arc::new(LsmState::new(segments))),
            maintenance_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    fn snapshot(&self) -> Result<Arc<LsmState>> {
        if self.is_closed() {
            return Err(StrataError::Closed);
        }
        Ok(Arc::clone(&self.state.read()))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value by key
    ///
    /// Search order:
    /// 1. Active MemTable
    /// 2. Frozen MemTables (newest to oldest)
    /// 3. Segments (newest to oldest)
    ///
    /// The first version found decides; a tombstone means `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let state = self.snapshot()?;
        Ok(state.find(key).and_then(|entry| entry.into_parts().1))
    }

    /// Live entries with `from <= key < to`, ascending
    ///
    /// `None` leaves that side unbounded. The iterator reads lazily from a
    /// snapshot taken now; later writes may or may not be observed.
    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<MergeIterator> {
        let state = self.snapshot()?;
        let range = KeyRange::new(from, to);
        Ok(MergeIterator::new(state.sources(&range)))
    }

    /// All live entries, ascending
    pub fn scan(&self) -> Result<MergeIterator> {
        self.range(None, None)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert or replace an entry; a tombstone entry deletes the key
    pub fn upsert(&self, entry: Entry) -> Result<()> {
        // Hold the read lock across the insert so a concurrent freeze
        // cannot detach this MemTable mid-write
        let state = self.state.read();
        if self.is_closed() {
            return Err(StrataError::Closed);
        }
        state.memtable.insert(entry);
        Ok(())
    }

    /// Put a key-value pair
    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        self.upsert(Entry::put(key, value))
    }

    /// Delete a key
    pub fn delete(&self, key: impl Into<Bytes>) -> Result<()> {
        self.upsert(Entry::tombstone(key))
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Persist the active MemTable as a new segment
    ///
    /// No-op when nothing was written since the last flush. Writes issued
    /// while the flush runs land in a fresh MemTable.
    pub fn flush(&self) -> Result<()> {
        let _maintenance = self.maintenance_lock.lock();
        if self.is_closed() {
            return Err(StrataError::Closed);
        }
        self.flush_locked()
    }

    /// Flush implementation (called with the maintenance lock held)
    fn flush_locked(&self) -> Result<()> {
        self.freeze_memtable();

        // Oldest first, so generations follow write order. A table whose
        // flush failed earlier is still here and is retried.
        while let Some(table) = self.oldest_frozen() {
            let segment = self.storage.build_segment(table.iter())?;

            let mut segments = self.state.read().segments.clone();
            if let Some(segment) = &segment {
                segments.insert(0, Arc::clone(segment));
                if let Err(e) = self.storage.commit(&segments) {
                    segment.mark_obsolete();
                    return Err(e);
                }
            }

            {
                let mut guard = self.state.write();
                let mut next = LsmState::clone(&guard);
                next.frozen.retain(|t| !Arc::ptr_eq(t, &table));
                next.segments = segments;
                *guard = Arc::new(next);
            }

            if let Some(segment) = &segment {
                tracing::debug!(
                    generation = segment.generation(),
                    entries = segment.entry_count(),
                    bytes = segment.data_len(),
                    "memtable flushed"
                );
            }
        }

        Ok(())
    }

    /// Merge everything into one segment, dropping tombstones and
    /// overwritten versions
    ///
    /// Afterwards exactly one segment remains, or none if every key was
    /// deleted. Replaced segment files are removed once no reader uses them.
    pub fn compact(&self) -> Result<()> {
        let _maintenance = self.maintenance_lock.lock();
        if self.is_closed() {
            return Err(StrataError::Closed);
        }

        self.freeze_memtable();
        let state = Arc::clone(&self.state.read());
        if state.frozen.is_empty() && state.segments.is_empty() {
            return Ok(());
        }

        // The active MemTable is empty in `state`; skip it
        let all = KeyRange::all();
        let mut sources: Vec<Box<dyn SortedSource>> = Vec::new();
        for table in &state.frozen {
            sources.push(Box::new(table.range(&all)));
        }
        for segment in &state.segments {
            sources.push(Box::new(segment.range(&all)));
        }

        let segment = self.storage.build_segment(MergeIterator::new(sources))?;
        let segments: Vec<Arc<Segment>> = segment.iter().cloned().collect();
        if let Err(e) = self.storage.commit(&segments) {
            if let Some(segment) = &segment {
                segment.mark_obsolete();
            }
            return Err(e);
        }

        {
            let mut guard = self.state.write();
            let mut next = LsmState::clone(&guard);
            next.frozen.retain(|t| !state.frozen.iter().any(|f| Arc::ptr_eq(t, f)));
            next.segments = segments;
            *guard = Arc::new(next);
        }

        for old in &state.segments {
            old.mark_obsolete();
        }

        tracing::info!(
            replaced_segments = state.segments.len(),
            absorbed_memtables = state.frozen.len(),
            generation = segment.as_ref().map(|s| s.generation()),
            entries = segment.as_ref().map_or(0, |s| s.entry_count()),
            "compaction finished"
        );

        Ok(())
    }

    /// Swap in an empty MemTable; returns false if the active one was empty
    fn freeze_memtable(&self) -> bool {
        let mut guard = self.state.write();
        if guard.memtable.is_empty() {
            return false;
        }
        let mut next = LsmState::clone(&guard);
        let frozen = std::mem::replace(&mut next.memtable, Arc::new(MemTable::new()));
        next.frozen.insert(0, frozen);
        *guard = Arc::new(next);
        true
    }

    fn oldest_frozen(&self) -> Option<Arc<MemTable>> {
        self.state.read().frozen.last().cloned()
    }

    /// Flush pending writes and release all segments
    ///
    /// Idempotent: later calls return immediately. If the final flush fails
    /// the engine stays open so the caller may retry.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let flushed = {
            let _maintenance = self.maintenance_lock.lock();
            self.flush_locked()
        };
        if let Err(e) = flushed {
            self.closed.store(false, Ordering::SeqCst);
            return Err(e);
        }

        // Drop our references; mappings go away with the last reader
        *self.state.write() = Arc::new(LsmState::new(Vec::new()));

        tracing::info!(data_dir = %self.config.data_dir.display(), "engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        self.storage.data_dir()
    }

    /// Get the number of live segments
    pub fn segment_count(&self) -> usize {
        self.state.read().segments.len()
    }

    /// Generations of the live segments, oldest first
    pub fn segment_generations(&self) -> Vec<u64> {
        self.state
            .read()
            .segments
            .iter()
            .rev()
            .map(|s| s.generation())
            .collect()
    }

    /// Get the active memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.state.read().memtable.entry_count()
    }

    /// Get the active memtable approximate size
    pub fn memtable_size(&self) -> usize {
        self.state.read().memtable.size()
    }

    /// Generation the next segment will receive
    pub fn next_generation(&self) -> u64 {
        self.storage.next_generation()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "failed to close engine on drop");
        }
    }
}
