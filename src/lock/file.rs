//! OS advisory file lock
//!
//! Locks a sidecar file rather than the data file: compaction renames a new
//! file over the data path, and a lock on the old inode would stop guarding
//! anything.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::Result;

use super::{LockBackend, LockMode};

/// `fs2`-backed advisory lock (flock on Unix, LockFileEx on Windows)
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Open or create the lock file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Sidecar lock path for a data file: `{data}.lock`
    pub fn path_for(data_path: &Path) -> PathBuf {
        let mut name = data_path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// fs2 reports contention as a plain io::Error; compare against its sentinel
fn is_contended(err: &io::Error) -> bool {
    let contended = fs2::lock_contended_error();
    err.raw_os_error() == contended.raw_os_error() || err.kind() == io::ErrorKind::WouldBlock
}

impl LockBackend for FileLock {
    fn try_lock(&self, mode: LockMode) -> Result<bool> {
        let attempt = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&self.file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&self.file),
        };

        match attempt {
            Ok(()) => Ok(true),
            Err(e) if is_contended(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn lock(&self, mode: LockMode) -> Result<()> {
        match mode {
            LockMode::Shared => FileExt::lock_shared(&self.file)?,
            LockMode::Exclusive => FileExt::lock_exclusive(&self.file)?,
        }
        Ok(())
    }

    fn unlock(&self) -> Result<()> {
        FileExt::unlock(&self.file)?;
        Ok(())
    }
}
