//! Error types for storage engines.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur inside a storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The data file contains bytes that violate its format.
    #[error("data file corrupted: {0}")]
    Corrupted(String),

    /// The data file has been closed.
    #[error("data file is closed")]
    Closed,

    /// Another live handle (or process) owns the data file.
    #[error("data file is locked: {path}")]
    Locked {
        /// Path of the contested file.
        path: String,
    },

    /// Encryption or decryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// A transaction is already active on this data file.
    #[error("a transaction is already active on this data file")]
    TransactionActive,

    /// The requested engine or capability is not provided.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates an encryption error.
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption(message.into())
    }

    /// Creates a lock-contention error for the given path.
    pub fn locked(path: impl Into<String>) -> Self {
        Self::Locked { path: path.into() }
    }

    /// Creates an unimplemented-capability error.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::Unimplemented(message.into())
    }
}
