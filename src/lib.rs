//! # StrataKV
//!
//! An embeddable, single-node key-value storage engine built on a
//! log-structured merge tree:
//! - Ordered in-memory MemTable for writes
//! - Immutable, memory-mapped segment files on disk
//! - Newest-wins point and range reads across all layers
//! - Explicit flush and full compaction
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │      get / range / upsert / delete / flush / compact         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │  MemTable   │  flush   │   Segments   │
//!   │ (SkipMap)   │ ───────► │   (mmap)     │
//!   └──────┬──────┘          └──────┬───────┘
//!          │                        │
//!          └──────────┬─────────────┘
//!                     ▼
//!             ┌───────────────┐
//!             │ MergeIterator │
//!             │ (newest wins) │
//!             └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod types;

pub mod engine;
pub mod iterator;
pub mod memtable;
pub mod storage;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::Config;
pub use engine::Engine;
pub use error::{Result, StrataError};
pub use iterator::MergeIterator;
pub use types::{Entry, KeyRange};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of StrataKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
