//! Error types for the companion-store library.
//!
//! Every fallible operation returns [`StoreError`]. Decode and duplicate-resolution
//! failures are normally recovered inside the library; the variants exist so the
//! recovery paths can log and count them uniformly.

use thiserror::Error;

/// Errors that can occur in the companion-store library.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying key-value storage failure (quota, I/O, backend fault)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Persisted blob could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A single duplicate could not be removed during cleanup
    #[error("Failed to remove duplicate {id}: {reason}")]
    DuplicateResolution {
        /// Identifier of the record that could not be removed
        id: String,
        /// Underlying failure
        reason: String,
    },

    /// Synchronization with the remote backend failed
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Caller-supplied record failed shape or format checks
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-side timeout elapsed
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors on the write path
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A persisted value that could not be turned back into a typed record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to decode `{key}`: {message}")]
pub struct DecodeError {
    /// Storage key (or other context) the raw value came from
    pub key: String,
    /// Parser message
    pub message: String,
}

/// Failures of the synchronization coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Sync requested while connectivity is down
    #[error("cannot sync while offline")]
    Offline,

    /// Another sync is already running
    #[error("a sync is already in progress")]
    InProgress,

    /// One or more aggregates could not be pushed
    #[error("failed to push {failed} of {attempted} aggregates: {message}")]
    Push {
        /// Number of pending aggregates attempted
        attempted: usize,
        /// Number that failed after all retries
        failed: usize,
        /// Last backend error message
        message: String,
    },
}

/// Convenience type alias for Result with `StoreError`
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<config::ConfigError> for StoreError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
