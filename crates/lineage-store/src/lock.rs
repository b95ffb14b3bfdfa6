//! Advisory whole-store locking.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use fs4::FileExt;
use lineage_core::errors::{ErrorInfo, LineageError};
use rand::Rng;
use tracing::{debug, warn};

/// Mode a [`StoreLock`] was taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers.
    Shared,
    /// Single writer.
    Exclusive,
}

/// Held lock on `<metadata>/lock`; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl StoreLock {
    /// Takes the exclusive lock, retrying with jittered exponential backoff.
    ///
    /// `retries` counts attempts after the first one. When every attempt finds
    /// the lock held the call fails with [`LineageError::LockContention`].
    pub fn exclusive(path: &Path, retries: u32, backoff_ms: u64) -> Result<Self, LineageError> {
        let file = open_lock_file(path)?;
        let mut rng = rand::thread_rng();
        let mut delay = backoff_ms.max(1);
        for attempt in 0..=retries {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    debug!(path = %path.display(), attempt, "acquired exclusive store lock");
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                        mode: LockMode::Exclusive,
                    });
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if attempt == retries {
                        break;
                    }
                    let jitter = rng.gen_range(0..=delay / 2);
                    warn!(
                        path = %path.display(),
                        attempt,
                        wait_ms = delay + jitter,
                        "store lock held by another writer; retrying"
                    );
                    thread::sleep(Duration::from_millis(delay + jitter));
                    delay = delay.saturating_mul(2);
                }
                Err(err) => return Err(LineageError::io("lock-acquire", path, err)),
            }
        }
        Err(LineageError::LockContention(
            ErrorInfo::new("lock-contention", "another writer holds the store lock")
                .with_context("path", path.display())
                .with_context("attempts", retries + 1)
                .with_hint("retry once the other operation has finished"),
        ))
    }

    /// Takes the shared lock, waiting for any writer to finish.
    pub fn shared(path: &Path) -> Result<Self, LineageError> {
        let file = open_lock_file(path)?;
        FileExt::lock_shared(&file).map_err(|err| LineageError::io("lock-acquire", path, err))?;
        debug!(path = %path.display(), "acquired shared store lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            mode: LockMode::Shared,
        })
    }

    /// Mode the lock is held in.
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %err, "failed to release store lock");
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File, LineageError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|err| LineageError::io("lock-open", path, err))
}
