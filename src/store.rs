//! Store Facade
//!
//! Public entry point composing the engine and the background sweeper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::info;

use crate::batch::{BatchOp, BatchResult};
use crate::compaction::CompactionReport;
use crate::config::Config;
use crate::engine::{Engine, StoreStats, VerifyReport};
use crate::error::{KvError, Result};
use crate::expiry::Clock;
use crate::lock::LockBackend;
use crate::sweeper::Sweeper;

/// A file-backed key-value store
///
/// Lifecycle: `open` → operations from any number of threads → `close`.
/// After `close` every operation fails with `Closed`. Dropping an open
/// store closes it.
///
/// Limits (enforced before any lock is taken):
/// - keys: 1..=32 bytes
/// - values: up to 16 KiB
/// - batches: up to 100 operations
/// - data file: `Config::max_file_size`, at most 1 GiB
pub struct Store {
    engine: Arc<Engine>,
    sweeper: Mutex<Option<Sweeper>>,
    closed: AtomicBool,
}

impl Store {
    /// Open or create the store described by `config`
    pub fn open(config: Config) -> Result<Self> {
        let engine = Engine::open(config)?;
        Self::start(engine)
    }

    /// Open with a specific lock backend and clock
    pub fn open_with(
        config: Config,
        backend: Box<dyn LockBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let engine = Engine::open_with(config, backend, clock)?;
        Self::start(engine)
    }

    fn start(engine: Engine) -> Result<Self> {
        let engine = Arc::new(engine);
        let sweeper = match engine.config().compaction_interval {
            Some(interval) => Some(Sweeper::start(Arc::clone(&engine), interval)?),
            None => None,
        };

        Ok(Self {
            engine,
            sweeper: Mutex::new(sweeper),
            closed: AtomicBool::new(false),
        })
    }

    // =========================================================================
    // Key-Value Operations
    // =========================================================================

    /// Get the live value for `key`, or `NotFound`
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        self.ensure_open()?;
        self.engine.get(key)
    }

    /// Write `key`, replacing any previous value
    pub fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        self.engine.set(key, value, ttl)
    }

    /// Write `key` only if it has no live value, else `KeyExists`
    pub fn create(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        self.engine.create(key, value, ttl)
    }

    /// Delete `key`, or `NotFound` if it has no live value
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.engine.delete(key)
    }

    /// Apply up to 100 operations under one lock; one result per operation
    pub fn batch(&self, ops: &[BatchOp]) -> Result<Vec<BatchResult>> {
        self.ensure_open()?;
        self.engine.batch(ops)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Rewrite the data file without dead records
    pub fn compact(&self) -> Result<CompactionReport> {
        self.ensure_open()?;
        self.engine.compact()
    }

    /// Counters for the current data file
    pub fn stats(&self) -> Result<StoreStats> {
        self.ensure_open()?;
        self.engine.stats()
    }

    /// Scan the whole file for corrupt records without changing anything
    pub fn verify(&self) -> Result<VerifyReport> {
        self.ensure_open()?;
        self.engine.verify()
    }

    /// Stop the sweeper and fsync; later calls fail with `Closed`
    ///
    /// Idempotent: closing a closed store is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(mut sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
        self.engine.sync()?;

        info!(path = %self.engine.path().display(), "store closed");
        Ok(())
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get the underlying engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(KvError::Closed);
        }
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close store cleanly");
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.engine.path())
            .field("closed", &self.is_closed())
            .finish()
    }
}
