//! Segment Iterator
//!
//! Positional forward scan over a slice of a segment.

use std::sync::Arc;

use crate::types::Entry;

use super::Segment;

/// Iterator over segment entries `[position, end)` in key order
///
/// Tombstones are yielded; the merge decides what they shadow. Only the
/// pages of entries actually visited are touched.
pub struct SegmentIter {
    segment: Arc<Segment>,
    position: usize,
    end: usize,
}

impl SegmentIter {
    pub(super) fn new(segment: Arc<Segment>, position: usize, end: usize) -> Self {
        Self {
            segment,
            position,
            end,
        }
    }

    pub fn generation(&self) -> u64 {
        self.segment.generation()
    }
}

impl Iterator for SegmentIter {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.end {
            return None;
        }
        let entry = self.segment.entry_at(self.position);
        self.position += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SegmentIter {}
