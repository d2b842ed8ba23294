//! KeyDir
//!
//! In-memory map from key to the location of its latest record.

use std::collections::HashMap;

use bytes::Bytes;

use crate::expiry::LazyExpiry;
use crate::record::DamagedFrame;

use super::data_file::{CorruptSpan, ScannedRecord};

/// Where the latest record for a key lives, and what it says
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub offset: u64,
    pub len: u32,
    pub expires_at: Option<u64>,
    pub tombstone: bool,

    /// The latest record failed its checksum; its contents are unknown
    pub damaged: bool,
}

impl EntryMeta {
    /// Intact, not a tombstone and not past `expires_at`
    pub fn is_live(&self, now_ms: u64) -> bool {
        LazyExpiry::is_visible(self, now_ms)
    }
}

impl From<&ScannedRecord> for EntryMeta {
    fn from(record: &ScannedRecord) -> Self {
        Self {
            offset: record.offset,
            len: record.len,
            expires_at: record.expires_at,
            tombstone: record.tombstone,
            damaged: false,
        }
    }
}

/// Index of the data file, valid for one file generation
///
/// `scanned_to` is the offset up to which the file has been folded in; later
/// critical sections only scan the bytes past it.
#[derive(Debug, Default)]
pub struct KeyDir {
    generation: Option<u64>,
    scanned_to: u64,
    entries: HashMap<Bytes, EntryMeta>,

    total_records: u64,
    superseded: u64,
    tombstones: u64,
    damaged: u64,
    corrupt: u64,

    /// Offset of a damaged tail already reported, so it's logged once
    damaged_tail_at: Option<u64>,
}

impl KeyDir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything and start over for `generation`
    pub fn reset(&mut self, generation: u64) {
        *self = Self {
            generation: Some(generation),
            ..Self::default()
        };
    }

    /// Fold one record in; later records shadow earlier ones
    pub fn apply(&mut self, record: &ScannedRecord) {
        self.insert(record.key.clone(), EntryMeta::from(record));
    }

    /// Fold in a frame that failed its checksum
    ///
    /// The frame shadows every earlier record for its key, so the key reads as
    /// damaged until a later record replaces it. When the key bytes are the
    /// damaged part, the indexed key whose bytes make the checksum hold is
    /// the one shadowed.
    pub fn apply_damaged(&mut self, span: &CorruptSpan, frame: &DamagedFrame) {
        let key = self
            .entries
            .keys()
            .find(|key| *key != frame.key() && frame.fits_key(key))
            .cloned()
            .unwrap_or_else(|| frame.key().clone());

        self.insert(
            key,
            EntryMeta {
                offset: span.offset,
                len: span.len as u32,
                expires_at: None,
                tombstone: false,
                damaged: true,
            },
        );
    }

    fn insert(&mut self, key: Bytes, meta: EntryMeta) {
        self.total_records += 1;
        if meta.tombstone {
            self.tombstones += 1;
        }
        if meta.damaged {
            self.damaged += 1;
        }

        if let Some(previous) = self.entries.insert(key, meta) {
            self.superseded += 1;
            if previous.tombstone {
                self.tombstones -= 1;
            }
            if previous.damaged {
                self.damaged -= 1;
            }
        }
    }

    /// Latest record for `key`, if any (tombstones included)
    pub fn get(&self, key: &[u8]) -> Option<&EntryMeta> {
        self.entries.get(key)
    }

    /// All keys with their latest record
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &EntryMeta)> {
        self.entries.iter()
    }

    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    /// Whether the index already covers a file of `len` bytes at `generation`
    pub fn is_current(&self, generation: u64, len: u64) -> bool {
        self.generation == Some(generation) && self.scanned_to == len
    }

    pub fn scanned_to(&self) -> u64 {
        self.scanned_to
    }

    pub fn set_scanned_to(&mut self, offset: u64) {
        self.scanned_to = offset;
    }

    /// Distinct keys indexed, tombstoned ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records folded in since the last reset
    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    /// Records shadowed by a later record for the same key
    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    /// Keys whose latest record is a tombstone
    pub fn tombstones(&self) -> u64 {
        self.tombstones
    }

    /// Keys whose latest record is damaged
    pub fn damaged(&self) -> u64 {
        self.damaged
    }

    /// Corrupt frames skipped since the last reset
    pub fn corrupt(&self) -> u64 {
        self.corrupt
    }

    pub fn note_corrupt(&mut self, count: u64) {
        self.corrupt += count;
    }

    /// Record a damaged tail; returns true the first time a given offset is seen
    pub fn note_damaged_tail(&mut self, offset: u64) -> bool {
        let first = self.damaged_tail_at != Some(offset);
        self.damaged_tail_at = Some(offset);
        first
    }

    pub fn clear_damaged_tail(&mut self) {
        self.damaged_tail_at = None;
    }
}
