//! Iterator Module
//!
//! Every sorted data source (MemTable cursor, segment cursor) is an
//! iterator of [`Entry`] values in strictly ascending key order. The merge
//! takes them as boxed [`SortedSource`] trait objects, so it does not care
//! where an entry came from.

mod merge;

pub use merge::MergeIterator;

use crate::types::Entry;

/// An ascending, duplicate-free stream of entries (tombstones included)
pub trait SortedSource: Iterator<Item = Entry> + Send {}

impl<T> SortedSource for T where T: Iterator<Item = Entry> + Send {}
