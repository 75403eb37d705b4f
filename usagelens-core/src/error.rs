//! Error types for usagelens-core

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for the usagelens-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem failure, always tied to the path that failed
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Text did not match any supported timestamp format
    #[error("invalid format: {input:?} (expected {expected})")]
    InvalidFormat { input: String, expected: String },

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// File watcher could not be set up
    #[error("watch error: {0}")]
    Watch(String),

    /// None of the storage roots could be enumerated
    #[error("storage roots unavailable: {0}")]
    StorageRootsUnavailable(String),

    /// Service queried before `initialize()`
    #[error("service not initialized; call initialize() first")]
    NotInitialized,

    /// Service used after `dispose()`
    #[error("service has been disposed")]
    Disposed,
}

impl Error {
    /// Wrap an IO error with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<notify::Error> for Error {
    fn from(e: notify::Error) -> Self {
        Error::Watch(e.to_string())
    }
}

/// Result type alias for usagelens-core
pub type Result<T> = std::result::Result<T, Error>;
