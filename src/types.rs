//! Core types shared by every layer
//!
//! Keys and values are opaque byte sequences. Keys are ordered
//! lexicographically by unsigned byte; when one key is a prefix of the other
//! the shorter one sorts first. This is exactly `<[u8] as Ord>`.

use std::cmp::Ordering;
use std::ops::Bound;

use bytes::Bytes;

/// Compare two keys in storage order
#[inline]
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// A key paired with its value, or with a tombstone
///
/// `value == None` marks a deletion. An empty value is a live value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    key: Bytes,
    value: Option<Bytes>,
}

impl Entry {
    pub fn new(key: impl Into<Bytes>, value: Option<Bytes>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// A live key-value pair
    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self::new(key, Some(value.into()))
    }

    /// A deletion marker for `key`
    pub fn tombstone(key: impl Into<Bytes>) -> Self {
        Self::new(key, None)
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    pub fn into_parts(self) -> (Bytes, Option<Bytes>) {
        (self.key, self.value)
    }

    /// Approximate in-memory footprint (key + value bytes)
    pub fn byte_size(&self) -> usize {
        self.key.len() + self.value.as_ref().map_or(0, |v| v.len())
    }
}

/// Half-open key interval `[from, to)`; `None` on either side is unbounded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub from: Option<Bytes>,
    pub to: Option<Bytes>,
}

impl KeyRange {
    pub fn new(from: Option<&[u8]>, to: Option<&[u8]>) -> Self {
        Self {
            from: from.map(Bytes::copy_from_slice),
            to: to.map(Bytes::copy_from_slice),
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    /// Whether `key` is at or past the lower bound
    pub fn starts_before(&self, key: &[u8]) -> bool {
        self.from
            .as_ref()
            .map_or(true, |from| compare_keys(from, key) != Ordering::Greater)
    }

    /// Whether `key` is strictly below the upper bound
    pub fn ends_after(&self, key: &[u8]) -> bool {
        self.to
            .as_ref()
            .map_or(true, |to| compare_keys(key, to) == Ordering::Less)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.starts_before(key) && self.ends_after(key)
    }

    /// A range whose lower bound lies at or above its upper bound is empty
    pub fn is_empty(&self) -> bool {
        match (&self.from, &self.to) {
            (Some(from), Some(to)) => compare_keys(from, to) != Ordering::Less,
            _ => false,
        }
    }

    pub(crate) fn lower_bound(&self) -> Bound<Bytes> {
        match &self.from {
            Some(from) => Bound::Included(from.clone()),
            None => Bound::Unbounded,
        }
    }
}
