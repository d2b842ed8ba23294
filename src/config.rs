//! Configuration for filekv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{KvError, Result};

/// Hard ceiling on the data file size (1 GiB)
pub const MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Main configuration for a filekv store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Path of the data file. Sidecar files live next to it:
    ///   {path}            (header + record stream)
    ///   {path}.lock       (advisory lock target)
    ///   {path}.compact    (compaction output before rename)
    ///   {path}.quarantine (bytes cut out of a damaged file)
    pub path: PathBuf,

    /// Upper bound for the data file, never above `MAX_FILE_SIZE`
    pub max_file_size: u64,

    /// When to fsync the data file
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Expiry Configuration
    // -------------------------------------------------------------------------
    /// TTL applied to `set`/`create` calls that don't pass one
    pub default_ttl: Option<Duration>,

    /// How long past `expires_at` a record survives compaction
    pub expiry_grace: Duration,

    // -------------------------------------------------------------------------
    // Locking Configuration
    // -------------------------------------------------------------------------
    /// Max wait for the file lock; `None` blocks indefinitely
    pub lock_timeout: Option<Duration>,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Background sweeper tick; `None` disables the sweeper
    pub compaction_interval: Option<Duration>,

    /// Minimum reclaimable records before the sweeper compacts
    pub compaction_min_dead: u64,

    /// Minimum reclaimable/total ratio before the sweeper compacts
    pub compaction_dead_ratio: f64,
}

/// Data file sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every append (safest, slowest)
    EveryWrite,

    /// fsync on compaction and close only
    OnClose,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./kv_store.db"),
            max_file_size: MAX_FILE_SIZE,
            sync_strategy: SyncStrategy::OnClose,
            default_ttl: None,
            expiry_grace: Duration::from_secs(1),
            lock_timeout: Some(Duration::from_secs(10)),
            compaction_interval: Some(Duration::from_secs(1)),
            compaction_min_dead: 1024,
            compaction_dead_ratio: 0.5,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(KvError::Config("data file path is empty".to_string()));
        }
        if self.max_file_size > MAX_FILE_SIZE {
            return Err(KvError::Config(format!(
                "max_file_size {} exceeds the {} byte ceiling",
                self.max_file_size, MAX_FILE_SIZE
            )));
        }
        if self.max_file_size < crate::storage::FILE_HEADER_SIZE {
            return Err(KvError::Config(format!(
                "max_file_size {} is smaller than the file header",
                self.max_file_size
            )));
        }
        if matches!(self.default_ttl, Some(ttl) if ttl.is_zero()) {
            return Err(KvError::Config("default_ttl must be non-zero".to_string()));
        }
        if matches!(self.compaction_interval, Some(interval) if interval.is_zero()) {
            return Err(KvError::Config(
                "compaction_interval must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.compaction_dead_ratio) {
            return Err(KvError::Config(format!(
                "compaction_dead_ratio {} is outside 0.0..=1.0",
                self.compaction_dead_ratio
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the maximum data file size (in bytes)
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the TTL used when a write doesn't carry one
    pub fn default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// Set the grace period for expired records during compaction
    pub fn expiry_grace(mut self, grace: Duration) -> Self {
        self.config.expiry_grace = grace;
        self
    }

    /// Set the lock acquisition timeout
    pub fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    /// Set the background compaction interval
    pub fn compaction_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.compaction_interval = interval;
        self
    }

    /// Set the minimum number of reclaimable records that triggers compaction
    pub fn compaction_min_dead(mut self, count: u64) -> Self {
        self.config.compaction_min_dead = count;
        self
    }

    /// Set the reclaimable/total ratio that triggers compaction
    pub fn compaction_dead_ratio(mut self, ratio: f64) -> Self {
        self.config.compaction_dead_ratio = ratio;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
