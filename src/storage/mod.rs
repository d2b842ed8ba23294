//! Storage Module
//!
//! The data file and the in-memory index built from it.
//!
//! ## Responsibilities
//! - Create and validate the data file header
//! - Scan the record stream, resuming past corrupt records
//! - Append records and quarantine damaged bytes
//! - Track the latest record per key (`KeyDir`)
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (16 bytes)                                       │
//! │   Magic: "FKV1" (4) | Version: u16 (2) | Reserved (2)   │
//! │   Generation: u64 (8)                                   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Record stream (append-only until compaction)            │
//! │   [CRC][Flags][KeyLen][ValLen][ExpiresAt][Key][Value]   │
//! │   ... repeated ...                                      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! Compaction writes a new file with a new generation and renames it over the
//! old one; readers notice the generation change and rebuild their index.

mod data_file;
mod keydir;

pub use data_file::{
    compaction_path_for, quarantine_path_for, CorruptSpan, DataFile, FileHeader, ScanItem,
    ScanOutcome, ScannedRecord, FILE_HEADER_SIZE,
};
pub use keydir::{EntryMeta, KeyDir};
