//! Background Expiry Sweeper
//!
//! Periodically asks the engine to compact when enough of the data file is
//! reclaimable. This is "active expiry", as opposed to the lazy expiry every
//! read already applies.
//!
//! ## Design
//!
//! The sweeper runs on its own OS thread and:
//! 1. Waits for the configured interval (or a stop signal)
//! 2. Calls `Engine::maybe_compact`
//! 3. Logs what was reclaimed; lock timeouts are retried next tick

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Handle to a running sweeper thread
///
/// Dropping the handle stops the thread and waits for it to exit.
#[derive(Debug)]
pub struct Sweeper {
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Start sweeping `engine` every `interval`
    pub fn start(engine: Arc<Engine>, interval: Duration) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("filekv-sweeper".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => sweep_once(&engine),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!("expiry sweeper received shutdown signal");
                        return;
                    }
                }
            })?;

        info!(interval_ms = interval.as_millis() as u64, "background expiry sweeper started");

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for the current pass to finish
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("expiry sweeper thread panicked");
            }
            info!("background expiry sweeper stopped");
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sweep_once(engine: &Engine) {
    match engine.maybe_compact() {
        Ok(Some(report)) => debug!(
            records_before = report.records_before,
            records_after = report.records_after,
            bytes_reclaimed = report.bytes_reclaimed(),
            "sweeper compacted data file"
        ),
        Ok(None) => {}
        Err(e) if e.is_retryable() => {
            debug!(error = %e, "sweeper skipped a pass, lock busy");
        }
        Err(e) => warn!(error = %e, "sweeper pass failed"),
    }
}
