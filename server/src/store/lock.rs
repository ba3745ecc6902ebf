//! Advisory lock guarding store mutations.
//!
//! Two layers: a `tokio::sync::Mutex` serializes tasks inside this process,
//! and a lock file on disk guards against a second process sharing the same
//! store. A lock file whose mtime is older than the staleness threshold is
//! treated as abandoned (crashed holder) and force-released.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("store lock unavailable after {attempts} attempts")]
    Unavailable { attempts: u32 },
    #[error("store lock io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct LockConfig {
    /// A lock file older than this is treated as abandoned.
    pub staleness: Duration,
    pub max_attempts: u32,
    /// Linear backoff: attempt N sleeps N * retry_base.
    pub retry_base: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            staleness: Duration::from_secs(10),
            max_attempts: 5,
            retry_base: Duration::from_millis(100),
        }
    }
}

pub struct StoreLock {
    path: PathBuf,
    local: Mutex<()>,
    config: LockConfig,
}

#[derive(Debug)]
pub struct StoreLockGuard<'a> {
    path: &'a Path,
    _local: MutexGuard<'a, ()>,
}

impl Drop for StoreLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(self.path) {
            warn!(path = %self.path.display(), "failed to release lock file: {err}");
        }
    }
}

impl StoreLock {
    pub fn new(path: PathBuf, config: LockConfig) -> Self {
        Self {
            path,
            local: Mutex::new(()),
            config,
        }
    }

    /// Acquires the lock, force-releasing a stale lock file and retrying a
    /// bounded number of times with linear backoff.
    pub async fn acquire(&self) -> Result<StoreLockGuard<'_>, LockError> {
        let local = self.local.lock().await;

        let mut attempt = 0u32;
        while attempt < self.config.max_attempts {
            attempt += 1;
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(StoreLockGuard {
                        path: &self.path,
                        _local: local,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.is_stale()? {
                        warn!(
                            path = %self.path.display(),
                            staleness_ms = self.config.staleness.as_millis() as u64,
                            "force-releasing stale lock file"
                        );
                        match std::fs::remove_file(&self.path) {
                            Ok(()) => continue,
                            // Lost the removal race to another waiter.
                            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                            Err(err) => return Err(err.into()),
                        }
                    }
                    tokio::time::sleep(self.config.retry_base.saturating_mul(attempt)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(LockError::Unavailable {
            attempts: self.config.max_attempts,
        })
    }

    fn is_stale(&self) -> Result<bool, std::io::Error> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            // Holder released between open and stat.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(err),
        };
        let modified = metadata.modified()?;
        match modified.elapsed() {
            Ok(age) => Ok(age >= self.config.staleness),
            // Clock moved backwards; the file is from the future, not stale.
            Err(_) => Ok(false),
        }
    }
}
