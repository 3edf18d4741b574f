// Store lock file
// Serializes access to one source directory's snapshot store across
// processes. Acquisition waits up to a bounded timeout; release is
// guaranteed through the guard's Drop even when the holder errors out.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::backup::error::BackupError;

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// An OS-level advisory lock keyed on a lock file path.
#[derive(Debug, Clone)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock, retrying until `timeout` elapses.
    ///
    /// A second holder waits and then fails with a distinct lock-timeout
    /// error rather than touching the store.
    pub fn acquire(&self, timeout: Duration) -> Result<StoreLockGuard, BackupError> {
        let start = Instant::now();
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&self.path)
                .map_err(|e| {
                    BackupError::from_io_error(e, "opening lock file", Some(self.path.clone()))
                })?;
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(StoreLockGuard {
                        file,
                        path: self.path.clone(),
                    });
                }
                Err(_) if start.elapsed() < timeout => thread::sleep(RETRY_INTERVAL),
                Err(_) => {
                    return Err(BackupError::LockTimeout {
                        path: self.path.clone(),
                    });
                }
            }
        }
    }
}

/// Holds the lock for its lifetime; dropping releases it.
#[derive(Debug)]
pub struct StoreLockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}
