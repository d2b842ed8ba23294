//! Lock Manager
//!
//! Coordinates threads of one process on top of a process-granular backend.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::error::{KvError, Result};

use super::{LockBackend, LockMode};

/// Upper bound on the sleep between backend polls
const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// In-process holder bookkeeping
#[derive(Debug, Default)]
struct Holders {
    readers: usize,
    writer: bool,

    /// A thread is talking to the backend; everyone else waits
    pending: bool,
}

impl Holders {
    fn admits(&self, mode: LockMode) -> bool {
        if self.pending || self.writer {
            return false;
        }
        match mode {
            LockMode::Shared => true,
            LockMode::Exclusive => self.readers == 0,
        }
    }
}

/// Thread-safe front for a `LockBackend`
///
/// ## Protocol
/// - Shared: the first in-process reader takes the backend lock, later
///   readers piggyback, the last one out releases it.
/// - Exclusive: waits for zero in-process holders, then takes the backend
///   lock itself.
/// - While one thread is inside a backend call (`pending`), other threads
///   wait on the condvar, so the backend never sees concurrent calls.
pub struct LockManager {
    backend: Box<dyn LockBackend>,
    holders: Mutex<Holders>,
    changed: Condvar,
}

impl LockManager {
    pub fn new(backend: Box<dyn LockBackend>) -> Self {
        Self {
            backend,
            holders: Mutex::new(Holders::default()),
            changed: Condvar::new(),
        }
    }

    /// Acquire the lock, waiting at most `timeout` (forever if `None`)
    ///
    /// On timeout returns `LockTimeout` with nothing held.
    pub fn acquire(&self, mode: LockMode, timeout: Option<Duration>) -> Result<LockGuard<'_>> {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        let timed_out = || KvError::LockTimeout(timeout.unwrap_or_default());

        let mut holders = self.holders.lock();
        while !holders.admits(mode) {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut holders, deadline).timed_out()
                        && !holders.admits(mode)
                    {
                        debug!(?mode, "lock wait timed out in-process");
                        return Err(timed_out());
                    }
                }
                None => self.changed.wait(&mut holders),
            }
        }

        let needs_backend = match mode {
            LockMode::Shared => holders.readers == 0,
            LockMode::Exclusive => true,
        };

        if needs_backend {
            holders.pending = true;
            let outcome =
                MutexGuard::unlocked(&mut holders, || self.backend_acquire(mode, deadline));
            holders.pending = false;
            self.changed.notify_all();

            match outcome {
                Ok(true) => {}
                Ok(false) => {
                    debug!(?mode, "lock wait timed out on backend");
                    return Err(timed_out());
                }
                Err(e) => return Err(e),
            }
        }

        match mode {
            LockMode::Shared => holders.readers += 1,
            LockMode::Exclusive => holders.writer = true,
        }
        trace!(?mode, waited_us = started.elapsed().as_micros() as u64, "lock acquired");

        Ok(LockGuard {
            manager: self,
            mode,
            active: true,
        })
    }

    /// Release a guard, reporting backend errors
    pub fn release(&self, mut guard: LockGuard<'_>) -> Result<()> {
        guard.active = false;
        self.release_mode(guard.mode)
    }

    /// Take the backend lock, polling until `deadline` if there is one.
    /// `Ok(false)` means the deadline passed.
    fn backend_acquire(&self, mode: LockMode, deadline: Option<Instant>) -> Result<bool> {
        let Some(deadline) = deadline else {
            self.backend.lock(mode)?;
            return Ok(true);
        };

        let mut backoff = Duration::from_millis(1);
        loop {
            if self.backend.try_lock(mode)? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            std::thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    fn release_mode(&self, mode: LockMode) -> Result<()> {
        let mut holders = self.holders.lock();
        let last_out = match mode {
            LockMode::Shared => {
                holders.readers -= 1;
                holders.readers == 0
            }
            LockMode::Exclusive => {
                holders.writer = false;
                true
            }
        };

        let result = if last_out {
            self.backend.unlock()
        } else {
            Ok(())
        };

        drop(holders);
        self.changed.notify_all();
        trace!(?mode, "lock released");
        result
    }
}

/// Scoped lock handle; released on drop if not released explicitly
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    mode: LockMode,
    active: bool,
}

impl LockGuard<'_> {
    /// Mode held by this guard
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Release now, surfacing backend errors
    pub fn release(self) -> Result<()> {
        let manager = self.manager;
        manager.release(self)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            self.active = false;
            if let Err(e) = self.manager.release_mode(self.mode) {
                warn!(mode = ?self.mode, error = %e, "failed to release lock");
            }
        }
    }
}
