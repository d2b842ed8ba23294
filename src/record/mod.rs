//! Record Module
//!
//! A single key-value-TTL entry as it appears in the data file.
//!
//! ## Responsibilities
//! - Enforce key/value size limits
//! - Binary encoding with CRC32 checksums for corruption detection
//! - Tombstones for logical deletes
//!
//! ## Record Format
//! ```text
//! ┌─────────┬──────────┬───────────┬───────────┬──────────────┬─────┬───────┐
//! │ CRC (4) │ Flags(1) │ KeyLen(1) │ ValLen(4) │ ExpiresAt(8) │ Key │ Value │
//! └─────────┴──────────┴───────────┴───────────┴──────────────┴─────┴───────┘
//! ```
//! CRC covers everything after itself. Flags: bit 0 tombstone, bit 1 expiry set.

mod codec;

use bytes::Bytes;

use crate::error::{KvError, Result};
use crate::expiry::LazyExpiry;

pub use codec::{decode, encode, encoded_len, frame_len, DamagedFrame, DecodeError};
pub(crate) use codec::decode_frame;

/// Maximum key length in bytes
pub const MAX_KEY_SIZE: usize = 32;

/// Maximum value length in bytes (16 KiB)
pub const MAX_VALUE_SIZE: usize = 16 * 1024;

/// Fixed record header: CRC (4) + Flags (1) + KeyLen (1) + ValLen (4) + ExpiresAt (8)
pub const RECORD_HEADER_SIZE: usize = 18;

/// Largest possible encoded record
pub const MAX_RECORD_SIZE: usize = RECORD_HEADER_SIZE + MAX_KEY_SIZE + MAX_VALUE_SIZE;

pub(crate) const FLAG_TOMBSTONE: u8 = 0b0000_0001;
pub(crate) const FLAG_HAS_EXPIRY: u8 = 0b0000_0010;
pub(crate) const KNOWN_FLAGS: u8 = FLAG_TOMBSTONE | FLAG_HAS_EXPIRY;

/// A single record in the data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Bytes,

    /// Empty for tombstones
    pub value: Bytes,

    /// Absolute expiry, unix millis
    pub expires_at: Option<u64>,

    pub tombstone: bool,
}

impl Record {
    /// A live value record
    pub fn live(key: impl Into<Bytes>, value: impl Into<Bytes>, expires_at: Option<u64>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expires_at,
            tombstone: false,
        }
    }

    /// A tombstone marking `key` as deleted
    pub fn tombstone(key: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: Bytes::new(),
            expires_at: None,
            tombstone: true,
        }
    }

    /// Whether the record is past its expiry at `now_ms`
    pub fn is_expired(&self, now_ms: u64) -> bool {
        LazyExpiry::is_expired(self.expires_at, now_ms)
    }
}

/// Reject empty or oversized keys
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(KvError::Validation("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(KvError::Validation(format!(
            "key is {} bytes, limit is {}",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    Ok(())
}

/// Reject oversized values
pub fn validate_value(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(KvError::Validation(format!(
            "value is {} bytes, limit is {}",
            value.len(),
            MAX_VALUE_SIZE
        )));
    }
    Ok(())
}
