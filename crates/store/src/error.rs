//! Errors that can occur during metadata storage.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error during file operations.
    #[error("I/O error at {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored file is not a JSON object of session records.
    #[error("deserialization error at {path}: {message}")]
    FileDeserialization { path: PathBuf, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Injected or backend-specific failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }
}

impl From<StoreError> for gateway_core::Error {
    fn from(err: StoreError) -> Self {
        gateway_core::Error::persistence(err.to_string())
    }
}
