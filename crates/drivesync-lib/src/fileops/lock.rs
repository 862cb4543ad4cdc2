//! File-based advisory locking with RAII release.
//!
//! Uses `fs2` for cross-platform exclusive file locks. The CLI process and
//! the daemon process both write the persisted state file, so writes are
//! serialized through one of these locks.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;

use crate::errors::{Result, SyncError};

pub struct FileLock {
    path: PathBuf,
}

/// RAII guard that holds an exclusive file lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to acquire the lock once.
    ///
    /// Returns [`SyncError::LockConflict`] if another holder has it.
    pub fn try_acquire(&self) -> Result<LockGuard> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;

        file.try_lock_exclusive().map_err(|_| SyncError::LockConflict {
            path: self.path.clone(),
        })?;

        Ok(LockGuard { file })
    }

    /// Acquire the lock, polling every `interval` for up to `attempts` tries.
    pub async fn acquire(&self, attempts: u32, interval: Duration) -> Result<LockGuard> {
        let mut last_err = None;
        for attempt in 0..attempts.max(1) {
            match self.try_acquire() {
                Ok(guard) => return Ok(guard),
                Err(e @ SyncError::LockConflict { .. }) => {
                    tracing::debug!(path = %self.path.display(), attempt, "state lock busy");
                    last_err = Some(e);
                    tokio::time::sleep(interval).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(SyncError::LockConflict {
            path: self.path.clone(),
        }))
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // The lock file itself stays; removing it would race a waiting holder.
        let _ = self.file.unlock();
    }
}
