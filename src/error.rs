//! Error types for StrataKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for StrataKV operations
#[derive(Debug, Error)]
pub enum StrataError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Initialization Errors
    // -------------------------------------------------------------------------
    #[error("Initialization failed: {0}")]
    Init(String),

    // -------------------------------------------------------------------------
    // Segment Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt segment {generation}: {reason}")]
    CorruptSegment { generation: u64, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Manifest Errors
    // -------------------------------------------------------------------------
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Engine is closed")]
    Closed,
}

impl StrataError {
    pub(crate) fn corrupt(generation: u64, reason: impl Into<String>) -> Self {
        StrataError::CorruptSegment {
            generation,
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for StrataError {
    fn from(e: bincode::Error) -> Self {
        StrataError::Serialization(e.to_string())
    }
}
