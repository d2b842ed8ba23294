//! # filekv
//!
//! A single-node, file-backed key-value store with:
//! - One append-only data file, checksummed records
//! - Cross-process safety through an OS file lock
//! - Per-key TTL with lazy expiry and background compaction
//! - Batches of up to 100 operations under one lock acquisition
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                                │
//! │            (lifecycle, Closed after close)                   │
//! └──────────────┬───────────────────────────────┬──────────────┘
//!                │                               │
//!                ▼                               ▼
//! ┌──────────────────────────────┐     ┌──────────────────────┐
//! │            Engine            │◄────│       Sweeper        │
//! │  (refresh, get/set/delete)   │     │  (maybe_compact/tick)│
//! └──────┬───────────────┬───────┘     └──────────────────────┘
//!        │               │
//!        ▼               ▼
//! ┌─────────────┐  ┌─────────────┐     ┌──────────────────────┐
//! │ LockManager │  │   KeyDir    │     │     Compaction       │
//! │ (S/X modes) │  │  (RwLock)   │     │  (temp + rename)     │
//! └──────┬──────┘  └──────┬──────┘     └──────────────────────┘
//!        │                │
//!        ▼                ▼
//! ┌─────────────┐  ┌─────────────┐
//! │  FileLock   │  │  DataFile   │
//! │ ({db}.lock) │  │ (records)   │
//! └─────────────┘  └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use filekv::{Config, Store};
//!
//! let store = Store::open(Config::builder().path("data/kv.db").build())?;
//! store.set(b"session", b"abc", Some(Duration::from_secs(60)))?;
//! assert_eq!(store.get(b"session")?.as_ref(), b"abc");
//! store.close()?;
//! # Ok::<(), filekv::KvError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod lock;
pub mod storage;
pub mod expiry;
pub mod batch;
pub mod compaction;
pub mod engine;
pub mod sweeper;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KvError, Result};
pub use config::{Config, ConfigBuilder, SyncStrategy};
pub use batch::{BatchOp, BatchOutcome, BatchResult};
pub use compaction::CompactionReport;
pub use engine::{Engine, StoreStats, VerifyReport};
pub use expiry::{Clock, ManualClock, SystemClock};
pub use lock::{FileLock, LockBackend, LockMode, MemoryLock};
pub use store::Store;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of filekv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
