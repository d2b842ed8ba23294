//! In-memory lock backend
//!
//! Stands in for `FileLock` in single-process tests. Each `MemoryLock`
//! value acts as one process; clones share the lock table, so two engines
//! built from clones contend the way two processes would.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{KvError, Result};

use super::{LockBackend, LockMode};

#[derive(Debug, Default)]
struct Table {
    readers: usize,
    writer: bool,
}

#[derive(Debug, Default)]
struct Shared {
    table: Mutex<Table>,
    changed: Condvar,
}

/// Fake advisory lock held in memory
#[derive(Debug, Default)]
pub struct MemoryLock {
    shared: Arc<Shared>,

    /// Mode this handle currently holds
    held: Mutex<Option<LockMode>>,
}

impl MemoryLock {
    /// Create a lock with a fresh table
    pub fn new() -> Self {
        Self::default()
    }

    fn grant(table: &mut Table, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared if !table.writer => {
                table.readers += 1;
                true
            }
            LockMode::Exclusive if !table.writer && table.readers == 0 => {
                table.writer = true;
                true
            }
            _ => false,
        }
    }
}

impl Clone for MemoryLock {
    /// A new handle on the same table, holding nothing
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            held: Mutex::new(None),
        }
    }
}

impl LockBackend for MemoryLock {
    fn try_lock(&self, mode: LockMode) -> Result<bool> {
        let mut held = self.held.lock();
        if held.is_some() {
            return Err(KvError::Validation(
                "memory lock handle already holds a lock".to_string(),
            ));
        }

        let granted = Self::grant(&mut self.shared.table.lock(), mode);
        if granted {
            *held = Some(mode);
        }
        Ok(granted)
    }

    fn lock(&self, mode: LockMode) -> Result<()> {
        let mut held = self.held.lock();
        if held.is_some() {
            return Err(KvError::Validation(
                "memory lock handle already holds a lock".to_string(),
            ));
        }

        let mut table = self.shared.table.lock();
        while !Self::grant(&mut table, mode) {
            self.shared.changed.wait(&mut table);
        }
        *held = Some(mode);
        Ok(())
    }

    fn unlock(&self) -> Result<()> {
        let mut held = self.held.lock();
        let mut table = self.shared.table.lock();
        match held.take() {
            Some(LockMode::Shared) => table.readers -= 1,
            Some(LockMode::Exclusive) => table.writer = false,
            None => {}
        }
        self.shared.changed.notify_all();
        Ok(())
    }
}
