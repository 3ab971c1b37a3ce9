//! Cross-process lock guarding the bus document
//!
//! The lock is an OS advisory lock (`flock` / `LockFileEx`) on a sibling
//! file. The file itself is never removed, so there is nothing to break:
//! the OS drops the lock when its holder closes the file or exits.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Delay between attempts while another holder has the lock
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Held lock; released on drop
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: File,
}

impl FileLock {
    /// Acquire the lock at `path`, waiting up to `timeout`
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                Error::Storage(format!("failed to open lock {}: {}", path.display(), e))
            })?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("Acquired bus lock {}", path.display());
                    return Ok(Self {
                        path: path.to_path_buf(),
                        file,
                    });
                }
                Err(e) if is_contended(&e) => {
                    if started.elapsed() >= timeout {
                        return Err(Error::Storage(format!(
                            "timed out after {}ms waiting for lock {}",
                            timeout.as_millis(),
                            path.display()
                        )));
                    }
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(Error::Storage(format!(
                        "failed to lock {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release bus lock {}: {}", self.path.display(), e);
        }
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
