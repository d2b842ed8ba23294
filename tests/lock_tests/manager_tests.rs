//! Tests for the lock manager
//!
//! These tests verify:
//! - Shared/exclusive compatibility within one process
//! - Contention between "processes" (separate backends on one lock)
//! - Timeouts leave nothing held
//! - Guards release on every exit path

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use filekv::error::KvError;
use filekv::lock::{FileLock, LockManager, LockMode, MemoryLock};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// Two managers contending on one lock table, like two processes
fn setup_memory_pair() -> (LockManager, LockManager) {
    let lock = MemoryLock::new();
    (
        LockManager::new(Box::new(lock.clone())),
        LockManager::new(Box::new(lock)),
    )
}

/// Two managers on separate handles of one lock file
fn setup_file_pair() -> (TempDir, LockManager, LockManager) {
    let temp_dir = TempDir::new().unwrap();
    let path = FileLock::path_for(&temp_dir.path().join("store.db"));
    let a = LockManager::new(Box::new(FileLock::open(&path).unwrap()));
    let b = LockManager::new(Box::new(FileLock::open(&path).unwrap()));
    (temp_dir, a, b)
}

const SHORT: Option<Duration> = Some(Duration::from_millis(50));

// =============================================================================
// In-Process Tests
// =============================================================================

#[test]
fn test_many_readers_one_writer() {
    let manager = Arc::new(LockManager::new(Box::new(MemoryLock::new())));
    let readers: Vec<_> = (0..4)
        .map(|_| manager.acquire(LockMode::Shared, None).unwrap())
        .collect();

    assert!(matches!(
        manager.acquire(LockMode::Exclusive, SHORT),
        Err(KvError::LockTimeout(_))
    ));

    drop(readers);
    let writer = manager.acquire(LockMode::Exclusive, SHORT).unwrap();
    assert_eq!(writer.mode(), LockMode::Exclusive);

    assert!(matches!(
        manager.acquire(LockMode::Shared, SHORT),
        Err(KvError::LockTimeout(_))
    ));
}

#[test]
fn test_writers_are_mutually_exclusive() {
    let manager = Arc::new(LockManager::new(Box::new(MemoryLock::new())));
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            thread::spawn(move || {
                for _ in 0..20 {
                    let _guard = manager.acquire(LockMode::Exclusive, None).unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
}

#[test]
fn test_guard_released_on_error_path() {
    let manager = LockManager::new(Box::new(MemoryLock::new()));

    fn failing(manager: &LockManager) -> filekv::Result<()> {
        let _guard = manager.acquire(LockMode::Exclusive, None)?;
        Err(KvError::Validation("boom".to_string()))
    }

    assert!(failing(&manager).is_err());
    assert!(manager.acquire(LockMode::Exclusive, SHORT).is_ok());
}

// =============================================================================
// Cross-Process Tests (MemoryLock)
// =============================================================================

#[test]
fn test_memory_backends_share_readers() {
    let (a, b) = setup_memory_pair();
    let _ra = a.acquire(LockMode::Shared, SHORT).unwrap();
    let _rb = b.acquire(LockMode::Shared, SHORT).unwrap();
}

#[test]
fn test_memory_backends_exclude_writer() {
    let (a, b) = setup_memory_pair();
    let writer = a.acquire(LockMode::Exclusive, SHORT).unwrap();

    let started = Instant::now();
    let result = b.acquire(LockMode::Shared, SHORT);
    assert!(matches!(result, Err(KvError::LockTimeout(_))));
    assert!(started.elapsed() >= Duration::from_millis(50));

    writer.release().unwrap();
    assert!(b.acquire(LockMode::Shared, SHORT).is_ok());
}

#[test]
fn test_timeout_then_success_after_release() {
    let (a, b) = setup_memory_pair();
    let a = Arc::new(a);
    let guard_holder = {
        let a = Arc::clone(&a);
        thread::spawn(move || {
            let _guard = a.acquire(LockMode::Exclusive, None).unwrap();
            thread::sleep(Duration::from_millis(150));
        })
    };

    // Let the other side take the lock first.
    thread::sleep(Duration::from_millis(30));
    assert!(matches!(
        b.acquire(LockMode::Exclusive, Some(Duration::from_millis(20))),
        Err(KvError::LockTimeout(_))
    ));

    let guard = b
        .acquire(LockMode::Exclusive, Some(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(guard.mode(), LockMode::Exclusive);
    drop(guard);

    guard_holder.join().unwrap();
}

#[test]
fn test_blocking_acquire_waits_for_release() {
    let (a, b) = setup_memory_pair();
    let writer = a.acquire(LockMode::Exclusive, None).unwrap();

    thread::scope(|s| {
        let waiter = s.spawn(|| {
            let started = Instant::now();
            let _guard = b.acquire(LockMode::Exclusive, None).unwrap();
            started.elapsed()
        });

        thread::sleep(Duration::from_millis(50));
        drop(writer);

        let waited = waiter.join().unwrap();
        assert!(waited >= Duration::from_millis(40));
    });
}

// =============================================================================
// Cross-Process Tests (FileLock)
// =============================================================================

#[test]
fn test_file_lock_creates_sidecar() {
    let temp_dir = TempDir::new().unwrap();
    let data = temp_dir.path().join("store.db");
    let path = FileLock::path_for(&data);

    assert_eq!(path, temp_dir.path().join("store.db.lock"));
    let lock = FileLock::open(&path).unwrap();
    assert_eq!(lock.path(), path.as_path());
    assert!(path.exists());
}

#[test]
fn test_file_lock_handles_contend() {
    let (_temp, a, b) = setup_file_pair();

    let writer = a.acquire(LockMode::Exclusive, SHORT).unwrap();
    assert!(matches!(
        b.acquire(LockMode::Shared, SHORT),
        Err(KvError::LockTimeout(_))
    ));
    assert!(matches!(
        b.acquire(LockMode::Exclusive, SHORT),
        Err(KvError::LockTimeout(_))
    ));

    drop(writer);
    let reader_b = b.acquire(LockMode::Shared, SHORT).unwrap();
    let reader_a = a.acquire(LockMode::Shared, SHORT).unwrap();
    assert!(matches!(
        a.acquire(LockMode::Exclusive, SHORT),
        Err(KvError::LockTimeout(_))
    ));

    drop(reader_a);
    drop(reader_b);
    assert!(a.acquire(LockMode::Exclusive, SHORT).is_ok());
}
