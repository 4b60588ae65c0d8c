//! Error types for the database facade.

use satchel_storage::StorageError;
use std::io;
use thiserror::Error;

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the database facade.
///
/// Every public verb is a single error boundary: failures from the storage
/// layer are converted into this taxonomy, and a failing verb releases
/// whatever it acquired before returning.
#[derive(Debug, Error)]
pub enum Error {
    /// A required argument was missing or malformed.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The requested record or document does not exist.
    #[error("not found")]
    NotFound,

    /// A bundle exists but does not contain the requested format.
    #[error("wrong format: {0}")]
    WrongFormat(String),

    /// No engine is registered for the tag, or the engine lacks the
    /// capability.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// The operation is not available under the current schema.
    #[error("unsupported by the current schema")]
    Unsupported,

    /// A mutating call was made outside an active transaction.
    #[error("no transaction is open")]
    NotInTransaction,

    /// A destructive call was made while a transaction is still open.
    #[error("a transaction is still open")]
    TransactionNotClosed,

    /// The operation conflicts with other live references to the handle.
    #[error("database is busy")]
    Busy,

    /// Encryption, decryption, or rekeying failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Stored bytes violate an invariant of the format.
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// A filesystem or engine I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The database file could not be opened.
    #[error("can't open file: {0}")]
    CantOpenFile(String),

    /// The handle was closed and is terminal.
    #[error("database is closed")]
    NotOpen,
}

impl Error {
    /// Creates an invalid-parameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    /// Creates a wrong-format error.
    pub fn wrong_format(message: impl Into<String>) -> Self {
        Self::WrongFormat(message.into())
    }

    /// Creates a corrupt-data error.
    pub fn corrupt_data(message: impl Into<String>) -> Self {
        Self::CorruptData(message.into())
    }

    /// A stable numeric code per error kind, for bindings that cannot
    /// carry a Rust enum.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParameter(_) => 1,
            Self::NotFound => 2,
            Self::WrongFormat(_) => 3,
            Self::Unimplemented(_) => 4,
            Self::Unsupported => 5,
            Self::NotInTransaction => 6,
            Self::TransactionNotClosed => 7,
            Self::Busy => 8,
            Self::Crypto(_) => 9,
            Self::CorruptData(_) => 10,
            Self::Io(_) => 11,
            Self::CantOpenFile(_) => 12,
            Self::NotOpen => 13,
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Io(io) if io.kind() == io::ErrorKind::NotFound => Self::NotFound,
            StorageError::Io(io) => Self::Io(io),
            StorageError::Corrupted(msg) => Self::CorruptData(msg),
            StorageError::Closed => Self::NotOpen,
            StorageError::Locked { path } => Self::CantOpenFile(format!("{path} is locked")),
            StorageError::Encryption(msg) => Self::Crypto(msg),
            StorageError::TransactionActive => Self::TransactionNotClosed,
            StorageError::Unimplemented(msg) => Self::Unimplemented(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let errors = [
            Error::invalid_parameter("x"),
            Error::NotFound,
            Error::wrong_format("x"),
            Error::Unimplemented("x".into()),
            Error::Unsupported,
            Error::NotInTransaction,
            Error::TransactionNotClosed,
            Error::Busy,
            Error::Crypto("x".into()),
            Error::corrupt_data("x"),
            Error::Io(io::Error::new(io::ErrorKind::Other, "x")),
            Error::CantOpenFile("x".into()),
            Error::NotOpen,
        ];
        let mut codes: Vec<i32> = errors.iter().map(Error::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn storage_kinds_map_into_taxonomy() {
        let e: Error = StorageError::Closed.into();
        assert!(matches!(e, Error::NotOpen));

        let e: Error = StorageError::encryption("bad key").into();
        assert!(matches!(e, Error::Crypto(_)));

        let e: Error = StorageError::Io(io::Error::from(io::ErrorKind::NotFound)).into();
        assert!(matches!(e, Error::NotFound));
    }
}
