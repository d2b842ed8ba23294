//! Error types for filekv
//!
//! Provides a unified error type for all operations.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using KvError
pub type Result<T> = std::result::Result<T, KvError>;

/// Unified error type for filekv operations
#[derive(Debug, Error)]
pub enum KvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Caller Errors (rejected before any mutation)
    // -------------------------------------------------------------------------
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found")]
    NotFound,

    #[error("Key already exists")]
    KeyExists,

    // -------------------------------------------------------------------------
    // Capacity Errors
    // -------------------------------------------------------------------------
    #[error("Store full: write would grow data file to {projected} bytes (limit {limit})")]
    StoreFull { projected: u64, limit: u64 },

    // -------------------------------------------------------------------------
    // Data Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Lock acquisition timed out after {0:?}")]
    LockTimeout(Duration),

    // -------------------------------------------------------------------------
    // Lifecycle / Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Store is closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KvError {
    /// True for outcomes a caller may retry without intervention
    pub fn is_retryable(&self) -> bool {
        matches!(self, KvError::LockTimeout(_))
    }

    /// True for `NotFound`, which is a query outcome rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::NotFound)
    }
}
