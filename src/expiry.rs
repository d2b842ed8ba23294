//! Expiry Policies
//!
//! Two independent policies the engine composes:
//!
//! - **Lazy expiry** (`LazyExpiry`): decides visibility. Every read asks it
//!   whether a record is past `expires_at`; expired records are treated as
//!   absent without touching the file.
//! - **Reclamation** (`ReclaimPolicy`): decides what compaction may physically
//!   drop and when a compaction pass is worth running. Expired records are
//!   kept for `grace` past their expiry so processes with slightly skewed
//!   clocks agree on what was visible.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::storage::{EntryMeta, KeyDir};

// =============================================================================
// Clock
// =============================================================================

/// Whole milliseconds in `d`, saturating at `u64::MAX`
fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Source of "now" in unix milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(saturating_millis)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Move forward by `by`, stopping at `u64::MAX`
    pub fn advance(&self, by: Duration) {
        let by = saturating_millis(by);
        let _ = self
            .now_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| {
                Some(now.saturating_add(by))
            });
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Lazy Expiry
// =============================================================================

/// Read-time visibility check
#[derive(Debug, Default, Clone, Copy)]
pub struct LazyExpiry;

impl LazyExpiry {
    /// A record expiring at `expires_at` is gone from `now_ms` on
    pub fn is_expired(expires_at: Option<u64>, now_ms: u64) -> bool {
        matches!(expires_at, Some(at) if now_ms >= at)
    }

    /// Whether readers may see this entry
    pub fn is_visible(meta: &EntryMeta, now_ms: u64) -> bool {
        !meta.tombstone && !meta.damaged && !Self::is_expired(meta.expires_at, now_ms)
    }

    /// Absolute expiry for a write made at `now_ms`
    pub fn expires_at(now_ms: u64, ttl: Option<Duration>) -> Option<u64> {
        ttl.map(|ttl| now_ms.saturating_add(saturating_millis(ttl)))
    }
}

// =============================================================================
// Reclamation
// =============================================================================

/// What compaction may drop, and when it should run
#[derive(Debug, Clone, Copy)]
pub struct ReclaimPolicy {
    pub grace: Duration,
    pub min_dead: u64,
    pub dead_ratio: f64,
}

/// Reclaimable records in a keydir at some instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeadCount {
    pub superseded: u64,
    pub tombstones: u64,
    pub expired: u64,
    pub damaged: u64,
}

impl DeadCount {
    pub fn total(&self) -> u64 {
        self.superseded + self.tombstones + self.expired + self.damaged
    }
}

impl ReclaimPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            grace: config.expiry_grace,
            min_dead: config.compaction_min_dead,
            dead_ratio: config.compaction_dead_ratio,
        }
    }

    /// Whether compaction may drop the latest record for a key
    ///
    /// Tombstones and damaged records always go: the rewrite drops every
    /// record they shadow.
    pub fn reclaimable(&self, meta: &EntryMeta, now_ms: u64) -> bool {
        if meta.tombstone || meta.damaged {
            return true;
        }
        match meta.expires_at {
            Some(at) => now_ms >= at.saturating_add(saturating_millis(self.grace)),
            None => false,
        }
    }

    /// Count everything a compaction at `now_ms` would drop
    pub fn count_dead(&self, keydir: &KeyDir, now_ms: u64) -> DeadCount {
        let expired = keydir
            .iter()
            .filter(|(_, meta)| {
                !meta.tombstone && !meta.damaged && self.reclaimable(meta, now_ms)
            })
            .count() as u64;

        DeadCount {
            superseded: keydir.superseded(),
            tombstones: keydir.tombstones(),
            expired,
            damaged: keydir.damaged(),
        }
    }

    /// Whether enough is reclaimable to justify a pass
    pub fn should_compact(&self, dead: &DeadCount, total_records: u64) -> bool {
        let dead = dead.total();
        if dead == 0 || dead < self.min_dead {
            return false;
        }
        total_records == 0 || dead as f64 / total_records as f64 >= self.dead_ratio
    }
}
