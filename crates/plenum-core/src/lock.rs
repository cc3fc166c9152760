//! Advisory file lock guarding an event log directory.
//!
//! Migrations hold the lock in [`LockMode::Write`] for the whole run; exports
//! and other readers take [`LockMode::Read`] so they never observe a log
//! that is being replaced. The lock is released when the guard drops.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ErrorCode;

const FIRST_BACKOFF: Duration = Duration::from_millis(2);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("event log lock {} is held elsewhere (gave up after {waited:?})", path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("cannot open event log lock {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io { .. } => ErrorCode::EventLogWriteFailed,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// How the log is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared with other readers, excludes writers.
    Read,
    /// Excludes readers and writers.
    Write,
}

/// RAII guard over `<log dir>/events.lock`.
#[derive(Debug)]
pub struct LogLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl LogLock {
    /// Take the lock at `path`, retrying with exponential backoff until
    /// `timeout` has passed.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] while a conflicting guard is alive and
    /// [`LockError::Io`] if the lock file cannot be opened.
    pub fn acquire(path: &Path, mode: LockMode, timeout: Duration) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        let started = Instant::now();
        let mut backoff = FIRST_BACKOFF;
        loop {
            // `File` has inherent methods of the same names.
            let locked = match mode {
                LockMode::Read => fs2::FileExt::try_lock_shared(&file).is_ok(),
                LockMode::Write => fs2::FileExt::try_lock_exclusive(&file).is_ok(),
            };
            if locked {
                tracing::trace!(path = %path.display(), ?mode, "event log locked");
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                    mode,
                });
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            thread::sleep(backoff.min(timeout.saturating_sub(waited)));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Shorthand for [`LockMode::Write`].
    ///
    /// # Errors
    ///
    /// See [`LogLock::acquire`].
    pub fn write(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Self::acquire(path, LockMode::Write, timeout)
    }

    /// Shorthand for [`LockMode::Read`].
    ///
    /// # Errors
    ///
    /// See [`LogLock::acquire`].
    pub fn read(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Self::acquire(path, LockMode::Read, timeout)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LogLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
