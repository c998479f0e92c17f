//! MemTable implementation
//!
//! SkipMap-based memtable; every method takes `&self`.

use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use crate::types::{Entry, KeyRange};

/// In-memory table for recent writes
///
/// A `None` value is a tombstone.
pub struct MemTable {
    map: SkipMap<Bytes, Option<Bytes>>,
    /// Approximate key + value bytes held
    size: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
            size: AtomicUsize::new(0),
        }
    }

    /// Get the entry for `key`, tombstones included
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.map
            .get(key)
            .map(|e| Entry::new(e.key().clone(), e.value().clone()))
    }

    /// Put a key-value pair, returning the new approximate size
    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> usize {
        self.insert(Entry::put(key, value))
    }

    /// Insert a tombstone, returning the new approximate size
    pub fn delete(&self, key: impl Into<Bytes>) -> usize {
        self.insert(Entry::tombstone(key))
    }

    /// Insert or replace an entry, returning the new approximate size
    pub fn insert(&self, entry: Entry) -> usize {
        let added = entry.byte_size();
        // Racing writers on the same key may both see the old entry;
        // the size is only an estimate.
        let removed = self.get(entry.key()).map_or(0, |old| old.byte_size());

        let (key, value) = entry.into_parts();
        self.map.insert(key, value);

        let grown = self.size.fetch_add(added, Ordering::AcqRel) + added;
        if removed == 0 {
            return grown;
        }
        let previous = self
            .size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                Some(s.saturating_sub(removed))
            })
            .unwrap_or(grown);
        previous.saturating_sub(removed)
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Get entry count (tombstones included)
    pub fn entry_count(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate over all entries in key order (for flush)
    pub fn iter(&self) -> impl Iterator<Item = Entry> + '_ {
        self.map
            .iter()
            .map(|e| Entry::new(e.key().clone(), e.value().clone()))
    }

    /// Lazy cursor over `range`, holding its own reference to the table
    pub fn range(self: &Arc<Self>, range: &KeyRange) -> MemTableIter {
        MemTableIter {
            table: Arc::clone(self),
            position: range.lower_bound(),
            upper: range.to.clone(),
            done: range.is_empty(),
        }
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Ascending cursor over a MemTable key range
///
/// Each step seeks to the first key after the previous one, so entries
/// inserted concurrently ahead of the cursor may be observed.
pub struct MemTableIter {
    table: Arc<MemTable>,
    position: Bound<Bytes>,
    upper: Option<Bytes>,
    done: bool,
}

impl Iterator for MemTableIter {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let found = match &self.position {
            Bound::Included(k) => self.table.map.lower_bound(Bound::Included(&k[..])),
            Bound::Excluded(k) => self.table.map.lower_bound(Bound::Excluded(&k[..])),
            Bound::Unbounded => self.table.map.front(),
        };

        let Some(found) = found else {
            self.done = true;
            return None;
        };

        let key = found.key().clone();
        if let Some(upper) = &self.upper {
            if key >= *upper {
                self.done = true;
                return None;
            }
        }

        self.position = Bound::Excluded(key.clone());
        Some(Entry::new(key, found.value().clone()))
    }
}
