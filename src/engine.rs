//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Own the data file and its in-memory index
//! - Run every file access inside a held lock
//! - Apply TTL visibility on reads, size limits on writes
//! - Run compaction when asked

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::batch::{validate_batch, BatchOp, BatchOutcome, BatchResult};
use crate::compaction::{self, CompactionReport};
use crate::config::{Config, SyncStrategy};
use crate::error::{KvError, Result};
use crate::expiry::{Clock, LazyExpiry, ReclaimPolicy, SystemClock};
use crate::lock::{FileLock, LockBackend, LockManager, LockMode};
use crate::record::{encode, validate_key, validate_value, Record};
use crate::storage::{CorruptSpan, DataFile, EntryMeta, KeyDir, ScanItem, ScannedRecord};

/// Point-in-time counters for a store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Keys a `get` would return right now
    pub live_keys: u64,

    /// Keys whose latest record is a tombstone
    pub tombstones: u64,

    /// Keys whose latest record has expired but is still on disk
    pub expired: u64,

    /// Records in the file, live or not
    pub total_records: u64,

    /// Records compaction would drop right now
    pub reclaimable: u64,

    /// Corrupt frames skipped while indexing
    pub corrupt_records: u64,

    pub file_size: u64,
    pub generation: u64,
}

/// Result of a read-only integrity scan
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub records: u64,
    pub corrupt: Vec<CorruptSpan>,
    pub damaged_tail: Option<CorruptSpan>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.corrupt.is_empty() && self.damaged_tail.is_none()
    }

    /// Every problem found, as public errors
    pub fn errors(&self) -> Vec<KvError> {
        self.corrupt
            .iter()
            .chain(self.damaged_tail.iter())
            .map(CorruptSpan::to_error)
            .collect()
    }
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (set/create/delete/write batches/compaction): exclusive lock
///   - ONE writer at a time across all threads and processes
///   - Refresh index → append → update index, all under the lock
///
/// - **Reads** (get/read batches/stats): shared lock
///   - Concurrent with other readers, never with a writer
///   - An up-to-date index is shared through a `keydir` read lock; only a
///     reader that finds new bytes takes the write lock to fold them in
///
/// The data file is reopened for every critical section, so a file that
/// another process compacted and renamed into place is picked up immediately.
pub struct Engine {
    config: Config,
    lock: LockManager,
    keydir: RwLock<KeyDir>,
    clock: Arc<dyn Clock>,
    reclaim: ReclaimPolicy,
}

impl Engine {
    /// Open or create a store with the OS file lock and the wall clock
    pub fn open(config: Config) -> Result<Self> {
        Self::prepare(&config)?;
        let backend = FileLock::open(&FileLock::path_for(&config.path))?;
        Self::open_prepared(config, Box::new(backend), Arc::new(SystemClock))
    }

    /// Open with a specific lock backend and clock
    ///
    /// On startup, under the exclusive lock:
    /// 1. Create the data file with a header if needed
    /// 2. Remove a temp file left by an interrupted compaction
    /// 3. Build the index, quarantining a damaged tail
    pub fn open_with(
        config: Config,
        backend: Box<dyn LockBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::prepare(&config)?;
        Self::open_prepared(config, backend, clock)
    }

    /// Validate `config` and create the data file's directory
    fn prepare(config: &Config) -> Result<()> {
        config.validate()?;
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    fn open_prepared(
        config: Config,
        backend: Box<dyn LockBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let engine = Self {
            reclaim: ReclaimPolicy::from_config(&config),
            lock: LockManager::new(backend),
            keydir: RwLock::new(KeyDir::new()),
            clock,
            config,
        };

        {
            let _guard = engine
                .lock
                .acquire(LockMode::Exclusive, engine.config.lock_timeout)?;
            let (mut file, created) = DataFile::open_or_create(&engine.config.path)?;
            compaction::remove_stale_temp(&engine.config.path)?;

            let mut keydir = engine.keydir.write();
            engine.refresh(&mut file, &mut keydir, true)?;

            info!(
                path = %engine.config.path.display(),
                created,
                keys = keydir.len(),
                records = keydir.total_records(),
                file_size = file.len(),
                "store opened"
            );
        }

        Ok(engine)
    }

    /// Open with default config at `path`
    pub fn open_path(path: &Path) -> Result<Self> {
        let mut config = Config::default();
        config.path = path.to_path_buf();
        Self::open(config)
    }

    // =========================================================================
    // Public Operations
    // =========================================================================

    /// Get the live value for `key`
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        validate_key(key)?;
        self.read_session(|ctx| ctx.get(key))
    }

    /// Write `key`, replacing any previous value
    ///
    /// `ttl` falls back to the configured default TTL.
    pub fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.validate_write(key, value, ttl)?;
        self.write_session(|ctx| ctx.put(key, value, ttl, false))
    }

    /// Write `key` only if it has no live value, else `KeyExists`
    pub fn create(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.validate_write(key, value, ttl)?;
        self.write_session(|ctx| ctx.put(key, value, ttl, true))
    }

    /// Delete `key`; `NotFound` (file untouched) if it has no live value
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.write_session(|ctx| ctx.delete(key))
    }

    /// Apply operations in order under a single lock acquisition
    ///
    /// Each operation succeeds or fails on its own; the returned results line
    /// up with `ops`. Fails as a whole only for an oversized batch (before
    /// anything runs) or when the lock or file can't be obtained.
    pub fn batch(&self, ops: &[BatchOp]) -> Result<Vec<BatchResult>> {
        validate_batch(ops)?;
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        if ops.iter().any(BatchOp::is_write) {
            self.write_session(|ctx| Ok(ops.iter().map(|op| ctx.apply(op)).collect()))
        } else {
            self.read_session(|ctx| Ok(ops.iter().map(|op| ctx.apply(op)).collect()))
        }
    }

    /// Compact now, regardless of thresholds
    pub fn compact(&self) -> Result<CompactionReport> {
        self.write_session(|ctx| ctx.compact())
    }

    /// Compact if enough of the file is reclaimable
    ///
    /// Checks under a shared lock first so an idle sweeper doesn't keep
    /// taking the exclusive lock.
    pub fn maybe_compact(&self) -> Result<Option<CompactionReport>> {
        let wanted = self.read_session(|ctx| Ok(ctx.wants_compaction()))?;
        if !wanted {
            return Ok(None);
        }

        self.write_session(|ctx| {
            if ctx.wants_compaction() {
                ctx.compact().map(Some)
            } else {
                Ok(None)
            }
        })
    }

    /// Counters for the current file
    pub fn stats(&self) -> Result<StoreStats> {
        self.read_session(|ctx| Ok(ctx.stats()))
    }

    /// Full read-only scan for corrupt records
    pub fn verify(&self) -> Result<VerifyReport> {
        let _guard = self.lock.acquire(LockMode::Shared, self.config.lock_timeout)?;
        let mut file = DataFile::open(&self.config.path, false)?;
        file.header()?;

        let outcome = file.scan(0, |_| {})?;
        Ok(VerifyReport {
            records: outcome.records,
            corrupt: outcome.corrupt,
            damaged_tail: outcome.damaged_tail,
        })
    }

    /// fsync the data file
    pub fn sync(&self) -> Result<()> {
        let _guard = self.lock.acquire(LockMode::Shared, self.config.lock_timeout)?;
        DataFile::open(&self.config.path, true)?.sync()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the data file path
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the lock manager (for tests holding locks across calls)
    pub fn lock_manager(&self) -> &LockManager {
        &self.lock
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    fn read_session<T>(&self, f: impl FnOnce(&mut ReadCtx<'_>) -> Result<T>) -> Result<T> {
        let _guard = self.lock.acquire(LockMode::Shared, self.config.lock_timeout)?;
        let mut file = DataFile::open(&self.config.path, false)?;
        let header = file.header()?;

        let keydir = self.keydir.read();
        let keydir = if keydir.is_current(header.generation, file.len()) {
            keydir
        } else {
            drop(keydir);
            let mut keydir = self.keydir.write();
            self.refresh(&mut file, &mut keydir, false)?;
            RwLockWriteGuard::downgrade(keydir)
        };

        let mut ctx = ReadCtx {
            engine: self,
            file,
            keydir: &*keydir,
            now: self.clock.now_millis(),
        };
        f(&mut ctx)
    }

    fn write_session<T>(&self, f: impl FnOnce(&mut WriteCtx<'_>) -> Result<T>) -> Result<T> {
        let _guard = self.lock.acquire(LockMode::Exclusive, self.config.lock_timeout)?;
        let mut file = DataFile::open(&self.config.path, true)?;

        let mut keydir = self.keydir.write();
        self.refresh(&mut file, &mut keydir, true)?;

        let mut ctx = WriteCtx {
            engine: self,
            file,
            keydir: &mut *keydir,
            now: self.clock.now_millis(),
        };
        f(&mut ctx)
    }

    /// Bring `keydir` up to date with `file`
    ///
    /// Same generation and no shrink: scan only the new bytes. Otherwise the
    /// file was replaced and the index is rebuilt. A damaged tail is
    /// quarantined and cut off when `exclusive`, otherwise reported.
    fn refresh(&self, file: &mut DataFile, keydir: &mut KeyDir, exclusive: bool) -> Result<()> {
        let header = file.header()?;
        if keydir.generation() != Some(header.generation) || file.len() < keydir.scanned_to() {
            if keydir.generation().is_some() {
                debug!(generation = header.generation, "data file replaced, rebuilding index");
            }
            keydir.reset(header.generation);
        }

        let outcome = file.scan(keydir.scanned_to(), |item| match item {
            ScanItem::Record(record) => keydir.apply(&record),
            ScanItem::Corrupt { span, frame } => {
                warn!(
                    offset = span.offset,
                    len = span.len,
                    error = %span.error,
                    "skipping corrupt record"
                );
                if let Some(frame) = frame {
                    keydir.apply_damaged(&span, &frame);
                }
            }
        })?;
        keydir.note_corrupt(outcome.corrupt.len() as u64);
        keydir.set_scanned_to(outcome.end);

        if let Some(tail) = outcome.damaged_tail {
            if exclusive {
                warn!(offset = tail.offset, len = tail.len, error = %tail.error, "damaged tail in data file");
                file.quarantine_tail(tail.offset, header.generation)?;
                keydir.clear_damaged_tail();
            } else if keydir.note_damaged_tail(tail.offset) {
                warn!(
                    offset = tail.offset,
                    len = tail.len,
                    error = %tail.error,
                    "damaged tail in data file, left for the next writer"
                );
            }
        }

        Ok(())
    }

    fn validate_write(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<()> {
        validate_key(key)?;
        validate_value(value)?;
        self.resolve_ttl(ttl)?;
        Ok(())
    }

    /// Explicit TTL, else the default; sub-millisecond TTLs are rejected
    fn resolve_ttl(&self, ttl: Option<Duration>) -> Result<Option<Duration>> {
        match ttl.or(self.config.default_ttl) {
            Some(ttl) if ttl.as_millis() == 0 => Err(KvError::Validation(
                "ttl must be at least one millisecond".to_string(),
            )),
            resolved => Ok(resolved),
        }
    }
}

// =============================================================================
// Critical-Section Contexts
// =============================================================================

fn damaged_record(meta: &EntryMeta) -> KvError {
    KvError::CorruptRecord {
        offset: meta.offset,
        reason: "latest record for this key failed its checksum".to_string(),
    }
}

/// Look up the live record for `key`
fn read_live(file: &mut DataFile, keydir: &KeyDir, key: &[u8], now: u64) -> Result<Bytes> {
    let meta = keydir.get(key).ok_or(KvError::NotFound)?;
    if meta.damaged {
        return Err(damaged_record(meta));
    }
    if !LazyExpiry::is_visible(meta, now) {
        return Err(KvError::NotFound);
    }

    let record = file.read_record(meta.offset, meta.len)?;
    if record.key.as_ref() != key {
        return Err(KvError::CorruptRecord {
            offset: meta.offset,
            reason: "record key doesn't match index".to_string(),
        });
    }
    Ok(record.value)
}

fn collect_stats(engine: &Engine, keydir: &KeyDir, file: &DataFile, now: u64) -> StoreStats {
    let mut stats = StoreStats {
        total_records: keydir.total_records(),
        tombstones: keydir.tombstones(),
        corrupt_records: keydir.corrupt(),
        file_size: file.len(),
        generation: keydir.generation().unwrap_or(0),
        reclaimable: engine.reclaim.count_dead(keydir, now).total(),
        ..StoreStats::default()
    };

    for (_, meta) in keydir.iter() {
        if LazyExpiry::is_visible(meta, now) {
            stats.live_keys += 1;
        } else if !meta.tombstone && !meta.damaged {
            stats.expired += 1;
        }
    }
    stats
}

/// State for one shared-lock critical section
struct ReadCtx<'a> {
    engine: &'a Engine,
    file: DataFile,
    keydir: &'a KeyDir,
    now: u64,
}

impl ReadCtx<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Bytes> {
        read_live(&mut self.file, self.keydir, key, self.now)
    }

    fn apply(&mut self, op: &BatchOp) -> BatchResult {
        match op {
            BatchOp::Get { key } => {
                validate_key(key)?;
                self.get(key).map(BatchOutcome::Value)
            }
            _ => Err(KvError::Validation(
                "write operation in a read-only batch".to_string(),
            )),
        }
    }

    fn wants_compaction(&self) -> bool {
        let dead = self.engine.reclaim.count_dead(self.keydir, self.now);
        self.engine
            .reclaim
            .should_compact(&dead, self.keydir.total_records())
    }

    fn stats(&self) -> StoreStats {
        collect_stats(self.engine, self.keydir, &self.file, self.now)
    }
}

/// State for one exclusive-lock critical section
struct WriteCtx<'a> {
    engine: &'a Engine,
    file: DataFile,
    keydir: &'a mut KeyDir,
    now: u64,
}

impl WriteCtx<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Bytes> {
        read_live(&mut self.file, &*self.keydir, key, self.now)
    }

    fn is_live(&self, key: &[u8]) -> bool {
        self.keydir
            .get(key)
            .is_some_and(|meta| LazyExpiry::is_visible(meta, self.now))
    }

    fn put(
        &mut self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
        create_only: bool,
    ) -> Result<()> {
        let ttl = self.engine.resolve_ttl(ttl)?;
        if create_only {
            // Whether a damaged key is live can't be known
            if let Some(meta) = self.keydir.get(key).filter(|meta| meta.damaged) {
                return Err(damaged_record(meta));
            }
            if self.is_live(key) {
                return Err(KvError::KeyExists);
            }
        }

        let expires_at = LazyExpiry::expires_at(self.now, ttl);
        let record = Record::live(
            Bytes::copy_from_slice(key),
            Bytes::copy_from_slice(value),
            expires_at,
        );
        self.append(record)
    }

    /// A damaged key is deleted too, which clears the damage
    fn delete(&mut self, key: &[u8]) -> Result<()> {
        let damaged = self.keydir.get(key).is_some_and(|meta| meta.damaged);
        if !damaged && !self.is_live(key) {
            return Err(KvError::NotFound);
        }
        self.append(Record::tombstone(Bytes::copy_from_slice(key)))
    }

    /// Append one record, enforcing the file size ceiling
    ///
    /// A failed write is cut back off so the file is left as it was.
    fn append(&mut self, record: Record) -> Result<()> {
        let bytes = encode(&record)?;
        let before = self.file.len();
        let projected = before + bytes.len() as u64;
        let limit = self.engine.config.max_file_size;
        if projected > limit {
            return Err(KvError::StoreFull { projected, limit });
        }

        let offset = match self.file.append(&bytes) {
            Ok(offset) => offset,
            Err(e) => {
                if let Err(truncate_err) = self.file.truncate(before) {
                    warn!(error = %truncate_err, "failed to roll back partial append");
                }
                return Err(e);
            }
        };
        if self.engine.config.sync_strategy == SyncStrategy::EveryWrite {
            self.file.sync()?;
        }

        self.keydir.apply(&ScannedRecord {
            offset,
            len: bytes.len() as u32,
            key: record.key,
            expires_at: record.expires_at,
            tombstone: record.tombstone,
        });
        self.keydir.set_scanned_to(self.file.len());
        Ok(())
    }

    fn apply(&mut self, op: &BatchOp) -> BatchResult {
        match op {
            BatchOp::Get { key } => {
                validate_key(key)?;
                self.get(key).map(BatchOutcome::Value)
            }
            BatchOp::Set { key, value, ttl } => {
                self.engine.validate_write(key, value, *ttl)?;
                self.put(key, value, *ttl, false).map(|_| BatchOutcome::Written)
            }
            BatchOp::Create { key, value, ttl } => {
                self.engine.validate_write(key, value, *ttl)?;
                self.put(key, value, *ttl, true).map(|_| BatchOutcome::Written)
            }
            BatchOp::Delete { key } => {
                validate_key(key)?;
                self.delete(key).map(|_| BatchOutcome::Deleted)
            }
        }
    }

    fn wants_compaction(&self) -> bool {
        let dead = self.engine.reclaim.count_dead(&*self.keydir, self.now);
        self.engine
            .reclaim
            .should_compact(&dead, self.keydir.total_records())
    }

    /// Rewrite the file, then index the replacement
    fn compact(&mut self) -> Result<CompactionReport> {
        let report = compaction::rewrite(
            &mut self.file,
            &*self.keydir,
            &self.engine.reclaim,
            self.now,
        )?;

        self.file = DataFile::open(&self.engine.config.path, true)?;
        self.keydir.reset(report.generation);
        self.engine.refresh(&mut self.file, &mut *self.keydir, true)?;
        Ok(report)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("path", &self.config.path)
            .finish_non_exhaustive()
    }
}
