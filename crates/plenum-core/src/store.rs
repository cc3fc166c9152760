//! Event log storage.
//!
//! The migration engine reads the whole log, rewrites it in memory and
//! replaces it in one write. [`FileEventStore`] keeps the log in
//! `<dir>/events.json` and serializes writers through an advisory lock on
//! `<dir>/events.lock`. Writes go through a temporary file and a rename, so
//! a reader never observes a partial log.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ErrorCode;
use crate::event::Position;
use crate::lock::{LockError, LogLock};

pub const EVENTS_FILE: &str = "events.json";
pub const LOCK_FILE: &str = "events.lock";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("event log not found at {0}")]
    NotFound(PathBuf),

    #[error("failed to access event log at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("event log at {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("event log is malformed: {0}")]
    Malformed(String),

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) | Self::Json { .. } | Self::Malformed(_) => {
                ErrorCode::EventLogUnreadable
            }
            Self::Io { .. } => ErrorCode::EventLogWriteFailed,
            Self::Lock(err) => err.code(),
        }
    }
}

/// The persisted form of an event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    pub migration_index: u64,
    pub positions: Vec<Position>,
}

impl EventLog {
    /// Positions must be strictly increasing and non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Malformed`] naming the offending position.
    pub fn validate(&self) -> Result<(), StoreError> {
        let mut previous = 0;
        for position in &self.positions {
            if position.position <= previous {
                return Err(StoreError::Malformed(format!(
                    "position {} does not follow position {previous}",
                    position.position
                )));
            }
            if position.events.is_empty() {
                return Err(StoreError::Malformed(format!(
                    "position {} has no events",
                    position.position
                )));
            }
            previous = position.position;
        }
        Ok(())
    }
}

/// Access to an event log.
pub trait EventStore {
    /// # Errors
    ///
    /// Returns [`StoreError`] if the log cannot be read.
    fn load(&self) -> Result<EventLog, StoreError>;

    /// Replace the whole log in one write.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the log cannot be written; the previous
    /// log stays intact.
    fn replace(&mut self, log: &EventLog) -> Result<(), StoreError>;

    /// Take the exclusive writer lock, if the store has one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Lock`] when the lock is held elsewhere.
    fn lock_exclusive(&self, _timeout: Duration) -> Result<Option<LogLock>, StoreError> {
        Ok(None)
    }

    /// Take a reader lock, waiting for a running writer to finish.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Lock`] when a writer holds the lock too long.
    fn lock_shared(&self, _timeout: Duration) -> Result<Option<LogLock>, StoreError> {
        Ok(None)
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the log cannot be read.
    fn migration_index(&self) -> Result<u64, StoreError> {
        self.load().map(|log| log.migration_index)
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the log cannot be read.
    fn positions(&self) -> Result<Vec<Position>, StoreError> {
        self.load().map(|log| log.positions)
    }
}

/// In-memory event log for tests and embedding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryEventStore {
    log: EventLog,
    writes: usize,
}

impl MemoryEventStore {
    #[must_use]
    pub const fn new(migration_index: u64, positions: Vec<Position>) -> Self {
        Self {
            log: EventLog {
                migration_index,
                positions,
            },
            writes: 0,
        }
    }

    #[must_use]
    pub const fn log(&self) -> &EventLog {
        &self.log
    }

    /// Number of successful [`EventStore::replace`] calls.
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.writes
    }
}

impl EventStore for MemoryEventStore {
    fn load(&self) -> Result<EventLog, StoreError> {
        Ok(self.log.clone())
    }

    fn replace(&mut self, log: &EventLog) -> Result<(), StoreError> {
        log.validate()?;
        self.log = log.clone();
        self.writes += 1;
        Ok(())
    }
}

/// Event log kept as a JSON document in a directory.
#[derive(Debug, Clone)]
pub struct FileEventStore {
    dir: PathBuf,
}

impl FileEventStore {
    /// Open an existing log directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if `<dir>/events.json` is missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        let events = dir.join(EVENTS_FILE);
        if !events.is_file() {
            return Err(StoreError::NotFound(events));
        }
        Ok(Self { dir })
    }

    /// Create a log directory holding `log`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory or file cannot be written.
    pub fn create(dir: impl Into<PathBuf>, log: &EventLog) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let mut store = Self { dir };
        store.replace(log)?;
        Ok(store)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn events_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }
}

impl EventStore for FileEventStore {
    fn load(&self) -> Result<EventLog, StoreError> {
        let path = self.events_path();
        let bytes = fs::read(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(path.clone())
            } else {
                StoreError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        let log: EventLog =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Json { path, source })?;
        log.validate()?;
        tracing::debug!(
            migration_index = log.migration_index,
            positions = log.positions.len(),
            "event log loaded"
        );
        Ok(log)
    }

    fn replace(&mut self, log: &EventLog) -> Result<(), StoreError> {
        log.validate()?;
        let path = self.events_path();
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        let json = serde_json::to_vec_pretty(log).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;

        tracing::info!(
            migration_index = log.migration_index,
            positions = log.positions.len(),
            path = %path.display(),
            "event log written"
        );
        Ok(())
    }

    fn lock_exclusive(&self, timeout: Duration) -> Result<Option<LogLock>, StoreError> {
        Ok(Some(LogLock::write(&self.lock_path(), timeout)?))
    }

    fn lock_shared(&self, timeout: Duration) -> Result<Option<LogLock>, StoreError> {
        Ok(Some(LogLock::read(&self.lock_path(), timeout)?))
    }
}
