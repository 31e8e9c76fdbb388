//! Exclusive advisory lock around a credential file.
//!
//! The lock is taken on a sidecar `<file>.lock` rather than on the
//! credential file itself: rewrites replace the credential file by rename,
//! and a lock held on the old inode would not exclude the next writer.

use std::ffi::OsString;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use snafu::ResultExt;
use tracing::{debug, warn};

use super::{Error, LockOpenSnafu, LockTimeoutSnafu};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Held for the duration of one read-modify-write. Unlocks on drop.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
    path: PathBuf,
}

/// `/etc/htpasswd/repo` -> `/etc/htpasswd/repo.lock`
pub(crate) fn lock_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

impl FileLock {
    /// Waits at most `timeout` for the lock guarding `target`.
    pub(crate) fn acquire(target: &Path, timeout: Duration) -> Result<Self, Error> {
        let path = lock_path(target);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .context(LockOpenSnafu { path: &path })?;

        let started = Instant::now();
        loop {
            match file.try_lock() {
                Ok(()) => {
                    debug!(lock = %path.display(), waited = ?started.elapsed(), "lock acquired");
                    return Ok(Self { file, path });
                }
                Err(TryLockError::WouldBlock) => {}
                Err(TryLockError::Error(source)) => {
                    return Err(source).context(LockOpenSnafu { path });
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                warn!(lock = %path.display(), ?timeout, "gave up waiting for lock");
                return LockTimeoutSnafu {
                    path: target,
                    timeout,
                }
                .fail();
            }
            thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            // Closing the descriptor releases it anyway.
            debug!(lock = %self.path.display(), error = %e, "explicit unlock failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_path() {
        assert_eq!(
            lock_path(Path::new("/srv/auth/example")),
            PathBuf::from("/srv/auth/example.lock")
        );
    }

    #[test]
    fn test_second_lock_times_out() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("example");

        let held = FileLock::acquire(&target, Duration::from_millis(100)).unwrap();
        let err = FileLock::acquire(&target, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }), "{err:?}");

        drop(held);
        FileLock::acquire(&target, Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn test_lock_waits_for_release() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("example");

        let held = FileLock::acquire(&target, Duration::from_millis(100)).unwrap();
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            drop(held);
        });

        FileLock::acquire(&target, Duration::from_secs(5)).unwrap();
        releaser.join().unwrap();
    }
}
