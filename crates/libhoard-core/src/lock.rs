//! Cross-process exclusive lock guarding manifest mutation
//!
//! Uses an advisory `flock` on a side file. The lock is tied to the open file
//! handle, so it is released when the guard drops, on every exit path.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use crate::error::HoardError;

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(200);

/// Held exclusive lock; released on drop
#[derive(Debug)]
pub struct ManifestLock {
    file: File,
    path: PathBuf,
}

impl ManifestLock {
    /// Acquire the lock, retrying with exponential backoff until `timeout`
    ///
    /// Returns `HoardError::LockTimeout` if another holder keeps it longer.
    pub fn acquire(lock_path: &Path, timeout: Duration) -> Result<Self, HoardError> {
        let file = open_lock_file(lock_path)?;
        let start = Instant::now();
        let mut delay = INITIAL_BACKOFF;

        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if !is_contended(&e) => return Err(HoardError::Io(e)),
                Err(_) if start.elapsed() < timeout => {
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
                Err(_) => {
                    return Err(HoardError::LockTimeout {
                        path: lock_path.to_path_buf(),
                        waited_ms: start.elapsed().as_millis() as u64,
                    })
                }
            }
        }

        debug!(path = %lock_path.display(), waited_ms = start.elapsed().as_millis() as u64, "manifest lock acquired");
        Ok(Self {
            file,
            path: lock_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "manifest lock released");
    }
}

/// Whether a failed `try_lock` means someone else holds the lock
fn is_contended(err: &io::Error) -> bool {
    err.kind() == fs2::lock_contended_error().kind()
}

fn open_lock_file(lock_path: &Path) -> Result<File, HoardError> {
    if let Some(parent) = lock_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)?)
}
