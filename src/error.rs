//! Error types shared across the crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from buffer/cache/disk stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database file is busy or locked by another process.
    #[error("database is busy or locked")]
    Busy,

    /// The process-wide store context was initialized twice.
    #[error("store context already initialized")]
    AlreadyInitialized,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while parsing a browser bookmark source.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid bookmark json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed bookmark source {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// The native browser database is locked, usually because the browser
    /// itself is writing. Fatal for the owning instance.
    #[error("bookmark source is locked")]
    SourceLocked,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the file/database watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to establish watch on {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error(transparent)]
    Notify(#[from] notify::Error),
}

/// Configuration and startup errors.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<config::ConfigError> for SetupError {
    fn from(err: config::ConfigError) -> Self {
        SetupError::Config(err.to_string())
    }
}

/// True when the sqlite error is a unique-constraint violation. This is the
/// conflict signal the upsert protocol relies on, never a real error.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// True when the sqlite error means the database is busy or locked.
pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}
