//! Lock Module
//!
//! Cross-process mutual exclusion over the data file.
//!
//! ## Responsibilities
//! - Shared (multi-reader) and exclusive (single-writer) modes
//! - Blocking acquisition with an optional timeout
//! - Scoped guards that release exactly once on every exit path
//! - Serialize acquire/release between threads of one process
//!
//! ## Layering
//! ```text
//!   threads ──► LockManager (Mutex + Condvar, per process)
//!                    │  first reader / every writer
//!                    ▼
//!              LockBackend (per process: FileLock via fs2, or MemoryLock)
//! ```
//! OS advisory locks are held per open file, not per thread, so the manager
//! counts in-process holders and only touches the backend on the first
//! acquire and the last release.

mod file;
mod manager;
mod memory;

pub use file::FileLock;
pub use manager::{LockGuard, LockManager};
pub use memory::MemoryLock;

use crate::error::Result;

/// Lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers, no writer
    Shared,

    /// One writer, no readers
    Exclusive,
}

/// Process-granular lock primitive
///
/// Implementations don't need to be re-entrant: the `LockManager` calls
/// `lock`/`try_lock` only when this process holds nothing, and `unlock`
/// only when the last in-process holder leaves.
pub trait LockBackend: Send + Sync {
    /// Try to take the lock without waiting. `Ok(false)` means contended.
    fn try_lock(&self, mode: LockMode) -> Result<bool>;

    /// Block until the lock is taken
    fn lock(&self, mode: LockMode) -> Result<()>;

    /// Release whatever mode is held
    fn unlock(&self) -> Result<()>;
}
