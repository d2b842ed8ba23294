//! Tests for the Store facade
//!
//! These tests verify:
//! - Operations pass through to the engine
//! - Lifecycle: every operation fails with `Closed` after `close`
//! - `close` is idempotent and drop closes
//! - The background sweeper reclaims expired records

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use filekv::{BatchOp, Config, KvError, ManualClock, MemoryLock, Store};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store() -> (TempDir, Store) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .path(temp_dir.path().join("kv_store.db"))
        .compaction_interval(None)
        .build();
    let store = Store::open(config).unwrap();
    (temp_dir, store)
}

fn assert_closed<T: std::fmt::Debug>(result: filekv::Result<T>) {
    match result {
        Err(KvError::Closed) => {}
        other => panic!("expected Closed, got {:?}", other),
    }
}

// =============================================================================
// Operation Tests
// =============================================================================

#[test]
fn test_basic_operations() {
    let (_temp, store) = setup_store();

    store.set(b"name", b"filekv", None).unwrap();
    store.create(b"version", b"1", None).unwrap();
    assert_eq!(store.get(b"name").unwrap().as_ref(), b"filekv");
    assert!(matches!(
        store.create(b"version", b"2", None),
        Err(KvError::KeyExists)
    ));

    store.delete(b"name").unwrap();
    assert!(store.get(b"name").unwrap_err().is_not_found());

    let results = store
        .batch(&[BatchOp::set("x", "1"), BatchOp::get("version")])
        .unwrap();
    assert!(results.iter().all(|r| r.is_ok()));

    let stats = store.stats().unwrap();
    assert_eq!(stats.live_keys, 2);
    assert_eq!(stats.tombstones, 1);
    assert!(store.verify().unwrap().is_clean());

    let report = store.compact().unwrap();
    assert_eq!(report.records_after, 2);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_operations_after_close() {
    let (_temp, store) = setup_store();
    store.set(b"k", b"v", None).unwrap();

    store.close().unwrap();
    assert!(store.is_closed());

    assert_closed(store.get(b"k"));
    assert_closed(store.set(b"k", b"v", None));
    assert_closed(store.create(b"k2", b"v", None));
    assert_closed(store.delete(b"k"));
    assert_closed(store.batch(&[BatchOp::get("k")]));
    assert_closed(store.compact());
    assert_closed(store.stats());
    assert_closed(store.verify());
}

#[test]
fn test_close_is_idempotent() {
    let (_temp, store) = setup_store();
    store.close().unwrap();
    store.close().unwrap();
}

#[test]
fn test_closed_checked_before_arguments() {
    let (_temp, store) = setup_store();
    store.close().unwrap();

    // Closed wins over argument errors.
    assert_closed(store.set(&[b'k'; 33], b"v", None));
}

#[test]
fn test_data_survives_close_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("kv_store.db");
    let config = Config::builder()
        .path(path)
        .compaction_interval(None)
        .build();

    {
        let store = Store::open(config.clone()).unwrap();
        store.set(b"persist", b"yes", None).unwrap();
        // Dropped without close.
    }

    let store = Store::open(config).unwrap();
    assert_eq!(store.get(b"persist").unwrap().as_ref(), b"yes");
}

// =============================================================================
// Sweeper Tests
// =============================================================================

#[test]
fn test_sweeper_reclaims_expired_records() {
    let temp_dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let config = Config::builder()
        .path(temp_dir.path().join("kv_store.db"))
        .compaction_interval(Some(Duration::from_millis(10)))
        .compaction_min_dead(1)
        .compaction_dead_ratio(0.1)
        .expiry_grace(Duration::ZERO)
        .build();
    let store = Store::open_with(config, Box::new(MemoryLock::new()), clock.clone()).unwrap();

    for i in 0..5 {
        store
            .set(format!("temp{}", i).as_bytes(), b"v", Some(Duration::from_secs(1)))
            .unwrap();
    }
    store.set(b"keep", b"v", None).unwrap();
    clock.advance(Duration::from_secs(2));

    let mut swept = false;
    for _ in 0..300 {
        if store.stats().unwrap().total_records == 1 {
            swept = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    assert!(swept, "sweeper never compacted");
    assert_eq!(store.get(b"keep").unwrap().as_ref(), b"v");
    store.close().unwrap();
}

#[test]
fn test_close_stops_sweeper() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .path(temp_dir.path().join("kv_store.db"))
        .compaction_interval(Some(Duration::from_millis(5)))
        .build();
    let store = Store::open(config).unwrap();
    store.set(b"k", b"v", None).unwrap();

    store.close().unwrap();
    assert_closed(store.get(b"k"));
}
