//! Merge Iterator
//!
//! K-way merge of sorted sources with newest-wins deduplication.
//!
//! Sources are passed newest first: the active MemTable, frozen MemTables,
//! then segments by descending generation. A source's position in that list
//! is its rank; for equal keys the lowest rank wins and every other source
//! positioned on that key is advanced past it unseen. A winning tombstone
//! produces no output but still shadows the older versions it beat.

use std::cmp::Ordering;
use std::collections::binary_heap::PeekMut;
use std::collections::BinaryHeap;

use crate::types::{compare_keys, Entry};

use super::SortedSource;

/// One source together with its pending entry
struct HeadEntry {
    entry: Entry,
    rank: usize,
    source: Box<dyn SortedSource>,
}

impl HeadEntry {
    /// Replace the pending entry with the source's next one
    fn advance(mut self) -> Option<Self> {
        let next = self.source.next()?;
        self.entry = next;
        Some(self)
    }
}

impl PartialEq for HeadEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeadEntry {}

impl PartialOrd for HeadEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeadEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse so the smallest key, then the
        // newest source, comes out first
        compare_keys(other.entry.key(), self.entry.key()).then_with(|| other.rank.cmp(&self.rank))
    }
}

/// Lazy ascending union of sorted sources, tombstones filtered out
///
/// Holds one pending entry per source. Not rewindable; build a new one to
/// scan again.
pub struct MergeIterator {
    heap: BinaryHeap<HeadEntry>,
}

impl MergeIterator {
    /// Merge `sources`, ordered newest first
    pub fn new(sources: Vec<Box<dyn SortedSource>>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (rank, mut source) in sources.into_iter().enumerate() {
            if let Some(entry) = source.next() {
                heap.push(HeadEntry {
                    entry,
                    rank,
                    source,
                });
            }
        }
        Self { heap }
    }

    /// Sources not yet exhausted
    pub fn live_sources(&self) -> usize {
        self.heap.len()
    }

    /// Take the newest version of the smallest pending key and advance every
    /// source that held that key
    fn next_version(&mut self) -> Option<Entry> {
        let head = self.heap.pop()?;

        loop {
            // The peek borrow must end before the heap is pushed to
            let shadowed = match self.heap.peek_mut() {
                Some(top) if top.entry.key() == head.entry.key() => PeekMut::pop(top),
                _ => break,
            };
            if let Some(advanced) = shadowed.advance() {
                self.heap.push(advanced);
            }
        }

        let HeadEntry {
            entry,
            rank,
            mut source,
        } = head;
        if let Some(next) = source.next() {
            self.heap.push(HeadEntry {
                entry: next,
                rank,
                source,
            });
        }
        Some(entry)
    }
}

impl Iterator for MergeIterator {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = self.next_version()?;
            if !entry.is_tombstone() {
                return Some(entry);
            }
        }
    }
}
