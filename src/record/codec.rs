//! Record codec
//!
//! Encoding and decoding functions for the on-disk record layout.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::error::{KvError, Result};

use super::{
    validate_key, validate_value, Record, FLAG_HAS_EXPIRY, FLAG_TOMBSTONE, KNOWN_FLAGS,
    MAX_KEY_SIZE, MAX_VALUE_SIZE, RECORD_HEADER_SIZE,
};

/// Why a byte range failed to decode as a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated record: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("invalid key length {0}")]
    KeyLength(usize),

    #[error("invalid value length {0}")]
    ValueLength(usize),

    #[error("unknown flags {0:#010b}")]
    Flags(u8),

    #[error("tombstone carries a {0} byte value")]
    TombstoneValue(usize),

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Checksum { stored: u32, computed: u32 },
}

impl DecodeError {
    /// Attach a file offset, producing the public error
    pub fn at(self, offset: u64) -> KvError {
        KvError::CorruptRecord {
            offset,
            reason: self.to_string(),
        }
    }

    /// Whether the length prefixes were sane, i.e. the frame can be skipped
    pub fn is_skippable(&self) -> bool {
        matches!(self, DecodeError::Checksum { .. } | DecodeError::TombstoneValue(_))
    }
}

/// Encoded size of a record with the given key/value lengths
pub fn encoded_len(key_len: usize, value_len: usize) -> usize {
    RECORD_HEADER_SIZE + key_len + value_len
}

/// Encode a record to bytes
///
/// Fails with `Validation` on an empty key, a key over 32 bytes, or a value
/// over 16 KiB.
pub fn encode(record: &Record) -> Result<Bytes> {
    validate_key(&record.key)?;
    validate_value(&record.value)?;
    if record.tombstone && !record.value.is_empty() {
        return Err(KvError::Validation(
            "tombstone records carry no value".to_string(),
        ));
    }

    let mut flags = 0u8;
    if record.tombstone {
        flags |= FLAG_TOMBSTONE;
    }
    if record.expires_at.is_some() {
        flags |= FLAG_HAS_EXPIRY;
    }

    let mut buf = BytesMut::with_capacity(encoded_len(record.key.len(), record.value.len()));
    buf.put_u32_le(0); // CRC placeholder
    buf.put_u8(flags);
    buf.put_u8(record.key.len() as u8);
    buf.put_u32_le(record.value.len() as u32);
    buf.put_u64_le(record.expires_at.unwrap_or(0));
    buf.put_slice(&record.key);
    buf.put_slice(&record.value);

    let crc = crc32fast::hash(&buf[4..]);
    buf[0..4].copy_from_slice(&crc.to_le_bytes());

    Ok(buf.freeze())
}

/// Decode a record from bytes
///
/// `bytes` must start at a record boundary; trailing bytes are ignored.
pub fn decode(bytes: &[u8]) -> Result<Record> {
    decode_frame(bytes).map(|(record, _)| record).map_err(|e| e.at(0))
}

/// Read the fixed header and return the full frame length
///
/// Only the length prefixes and flags are checked; the checksum isn't.
pub fn frame_len(header: &[u8]) -> std::result::Result<usize, DecodeError> {
    if header.len() < RECORD_HEADER_SIZE {
        return Err(DecodeError::Truncated {
            needed: RECORD_HEADER_SIZE,
            available: header.len(),
        });
    }

    let mut cursor = &header[4..RECORD_HEADER_SIZE];
    let flags = cursor.get_u8();
    let key_len = cursor.get_u8() as usize;
    let value_len = cursor.get_u32_le() as usize;

    if flags & !KNOWN_FLAGS != 0 {
        return Err(DecodeError::Flags(flags));
    }
    if key_len == 0 || key_len > MAX_KEY_SIZE {
        return Err(DecodeError::KeyLength(key_len));
    }
    if value_len > MAX_VALUE_SIZE {
        return Err(DecodeError::ValueLength(value_len));
    }

    Ok(encoded_len(key_len, value_len))
}

/// Decode one record, returning it with the number of bytes consumed
pub(crate) fn decode_frame(bytes: &[u8]) -> std::result::Result<(Record, usize), DecodeError> {
    let len = frame_len(bytes)?;
    if bytes.len() < len {
        return Err(DecodeError::Truncated {
            needed: len,
            available: bytes.len(),
        });
    }
    let frame = &bytes[..len];

    let stored = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    let computed = crc32fast::hash(&frame[4..]);
    if stored != computed {
        return Err(DecodeError::Checksum { stored, computed });
    }

    let mut cursor = &frame[4..];
    let flags = cursor.get_u8();
    let key_len = cursor.get_u8() as usize;
    let value_len = cursor.get_u32_le() as usize;
    let expires_raw = cursor.get_u64_le();

    let tombstone = flags & FLAG_TOMBSTONE != 0;
    if tombstone && value_len != 0 {
        return Err(DecodeError::TombstoneValue(value_len));
    }

    let key = Bytes::copy_from_slice(&cursor[..key_len]);
    let value = Bytes::copy_from_slice(&cursor[key_len..key_len + value_len]);
    let expires_at = (flags & FLAG_HAS_EXPIRY != 0).then_some(expires_raw);

    Ok((
        Record {
            key,
            value,
            expires_at,
            tombstone,
        },
        len,
    ))
}

/// A frame whose lengths are sane but whose checksum fails
///
/// The key bytes may themselves be the damaged part, so `fits_key` lets the
/// caller test whether a known key makes the checksum hold again.
pub struct DamagedFrame {
    key: Bytes,
    stored: u32,
    before_key: crc32fast::Hasher,
    after_key: crc32fast::Hasher,
}

impl DamagedFrame {
    /// `None` unless `bytes` holds a complete frame
    pub fn new(bytes: &[u8]) -> Option<Self> {
        let len = frame_len(bytes).ok()?;
        if bytes.len() < len {
            return None;
        }

        let key_end = RECORD_HEADER_SIZE + bytes[5] as usize;
        let mut before_key = crc32fast::Hasher::new();
        before_key.update(&bytes[4..RECORD_HEADER_SIZE]);
        let mut after_key = crc32fast::Hasher::new();
        after_key.update(&bytes[key_end..len]);

        Some(Self {
            key: Bytes::copy_from_slice(&bytes[RECORD_HEADER_SIZE..key_end]),
            stored: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            before_key,
            after_key,
        })
    }

    /// Key bytes as stored
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Whether the checksum holds with `key` in place of the stored key bytes
    pub fn fits_key(&self, key: &[u8]) -> bool {
        if key.len() != self.key.len() {
            return false;
        }

        let mut hasher = self.before_key.clone();
        hasher.update(key);
        hasher.combine(&self.after_key);
        hasher.finalize() == self.stored
    }
}

impl std::fmt::Debug for DamagedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DamagedFrame")
            .field("key", &self.key)
            .field("stored", &self.stored)
            .finish()
    }
}
