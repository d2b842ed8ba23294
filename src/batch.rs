//! Batch definitions
//!
//! Operations submitted together under one lock acquisition.

use std::time::Duration;

use bytes::Bytes;

use crate::error::{KvError, Result};

/// Maximum operations per batch
pub const MAX_BATCH_SIZE: usize = 100;

/// One operation inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Read a key
    Get { key: Bytes },

    /// Write a key, replacing any previous value
    Set {
        key: Bytes,
        value: Bytes,
        ttl: Option<Duration>,
    },

    /// Write a key only if it has no live value
    Create {
        key: Bytes,
        value: Bytes,
        ttl: Option<Duration>,
    },

    /// Delete a key
    Delete { key: Bytes },
}

impl BatchOp {
    pub fn get(key: impl Into<Bytes>) -> Self {
        BatchOp::Get { key: key.into() }
    }

    pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        BatchOp::Set {
            key: key.into(),
            value: value.into(),
            ttl: None,
        }
    }

    pub fn set_with_ttl(key: impl Into<Bytes>, value: impl Into<Bytes>, ttl: Duration) -> Self {
        BatchOp::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
        }
    }

    pub fn create(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        BatchOp::Create {
            key: key.into(),
            value: value.into(),
            ttl: None,
        }
    }

    pub fn delete(key: impl Into<Bytes>) -> Self {
        BatchOp::Delete { key: key.into() }
    }

    /// Key this operation touches
    pub fn key(&self) -> &Bytes {
        match self {
            BatchOp::Get { key }
            | BatchOp::Set { key, .. }
            | BatchOp::Create { key, .. }
            | BatchOp::Delete { key } => key,
        }
    }

    /// Whether the operation may modify the file
    pub fn is_write(&self) -> bool {
        !matches!(self, BatchOp::Get { .. })
    }
}

/// Successful outcome of one batch operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// `Get` found a live value
    Value(Bytes),

    /// `Set` or `Create` appended a record
    Written,

    /// `Delete` appended a tombstone
    Deleted,
}

impl BatchOutcome {
    /// The value for a `Get`, if this is one
    pub fn into_value(self) -> Option<Bytes> {
        match self {
            BatchOutcome::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// Per-operation result, in submission order
pub type BatchResult = Result<BatchOutcome>;

/// Reject a batch that is too large before anything runs
pub fn validate_batch(ops: &[BatchOp]) -> Result<()> {
    if ops.len() > MAX_BATCH_SIZE {
        return Err(KvError::Validation(format!(
            "batch has {} operations, limit is {}",
            ops.len(),
            MAX_BATCH_SIZE
        )));
    }
    Ok(())
}
