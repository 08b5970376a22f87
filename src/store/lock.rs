//! Exclusive advisory lock on a sidecar lock file.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{BuilderError, Result};

const MAX_BACKOFF: Duration = Duration::from_millis(100);

/// Held lock; released when dropped, including on early returns and panics.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock, polling until `timeout` elapses.
    ///
    /// Sleeps the calling thread between polls; async code uses
    /// [`acquire_async`](Self::acquire_async).
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let file = open_lock_file(path)?;
        let mut poll = Poll::new(timeout);
        loop {
            if try_lock(&file, path)? {
                return Ok(Self::held(file, path));
            }
            std::thread::sleep(poll.next_wait(path)?);
        }
    }

    /// Same as [`acquire`](Self::acquire) without blocking a runtime worker
    pub async fn acquire_async(path: &Path, timeout: Duration) -> Result<Self> {
        let file = open_lock_file(path)?;
        let mut poll = Poll::new(timeout);
        loop {
            if try_lock(&file, path)? {
                return Ok(Self::held(file, path));
            }
            tokio::time::sleep(poll.next_wait(path)?).await;
        }
    }

    fn held(file: File, path: &Path) -> Self {
        tracing::debug!(path = %path.display(), "Acquired state lock");
        Self {
            file,
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to release state lock");
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|err| BuilderError::io(parent, err))?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|err| BuilderError::io(path, err))
}

/// `Ok(false)` while another holder has the lock
fn try_lock(file: &File, path: &Path) -> Result<bool> {
    match FileExt::try_lock_exclusive(file) {
        Ok(()) => Ok(true),
        Err(err) if is_contended(&err) => Ok(false),
        Err(err) => Err(BuilderError::io(path, err)),
    }
}

/// Exponential backoff bounded by the overall timeout
struct Poll {
    started: Instant,
    timeout: Duration,
    backoff: Duration,
}

impl Poll {
    fn new(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
            backoff: Duration::from_millis(5),
        }
    }

    fn next_wait(&mut self, path: &Path) -> Result<Duration> {
        let waited = self.started.elapsed();
        if waited >= self.timeout {
            tracing::warn!(
                path = %path.display(),
                waited_ms = waited.as_millis() as u64,
                "Gave up waiting for state lock"
            );
            return Err(BuilderError::LockTimeout {
                path: path.to_path_buf(),
                waited_ms: waited.as_millis() as u64,
            });
        }
        let wait = self.backoff.min(self.timeout - waited);
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
        Ok(wait)
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_holder_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.lock");
        let _held = FileLock::acquire(&path, Duration::from_millis(50)).unwrap();

        let err = FileLock::acquire(&path, Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, BuilderError::LockTimeout { .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn async_acquire_waits_for_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.lock");
        let held = FileLock::acquire(&path, Duration::from_millis(50)).unwrap();

        let err = FileLock::acquire_async(&path, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, BuilderError::LockTimeout { .. }));

        drop(held);
        FileLock::acquire_async(&path, Duration::from_millis(50))
            .await
            .unwrap();
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.lock");
        {
            let lock = FileLock::acquire(&path, Duration::from_millis(50)).unwrap();
            assert_eq!(lock.path(), path.as_path());
        }
        FileLock::acquire(&path, Duration::from_millis(50)).unwrap();
    }
}
