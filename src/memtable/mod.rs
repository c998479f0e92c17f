//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory from many threads at once
//! - Track approximate size for operators
//! - Ordered iteration for segment creation and range scans
//!
//! ## Data Structure Choice
//! A lock-free skip list (`crossbeam_skiplist::SkipMap`):
//! - Ordered keys (required for segment generation)
//! - Concurrent inserts and reads without a table-wide lock
//! - Range cursors that re-seek instead of borrowing the map
//!
//! A MemTable is never cleared. When the engine flushes, it swaps in a new
//! empty table and freezes the old one until its segment is published.

mod table;

pub use table::{MemTable, MemTableIter};
