//! # Satchel Core
//!
//! The facade and transactional control layer of Satchel, an embedded
//! document database for mobile and offline applications.
//!
//! This crate provides:
//! - The [`Database`] handle: reference-counted open/close/delete, compact,
//!   rekey, document counting, and raw key/value access
//! - Recursive per-thread transactions over a single engine transaction
//! - Path and bundle resolution with storage-engine auto-detection
//! - Document expiration bookkeeping
//!
//! Persistence is delegated to a storage engine selected at open time; see
//! [`satchel_storage`] for the capability the facade consumes.
//!
//! ## Opening a database
//!
//! ```rust,ignore
//! use satchel_core::{Database, DatabaseConfig, DatabaseFlags};
//!
//! let config = DatabaseConfig::new()
//!     .flags(DatabaseFlags::CREATE | DatabaseFlags::BUNDLED);
//! let db = Database::open("my_database", &config)?;
//!
//! db.begin_transaction()?;
//! db.raw_put("local", b"note", b"", b"hello")?;
//! db.end_transaction(true)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bundle;
mod collate;
mod config;
mod database;
mod error;
mod expiry;
mod rawdoc;
mod transaction;

pub use collate::{CollatableReader, CollatableWriter};
pub use config::{DatabaseConfig, DatabaseFlags, Schema};
pub use database::{Database, DEFAULT_KEY_STORE, EXPIRY_KEY_STORE};
pub use error::{Error, Result};
pub use rawdoc::RawDocument;

pub use satchel_storage::engine::{DEFAULT_ENGINE, FORESTDB_ENGINE, SQLITE_ENGINE};
pub use satchel_storage::{
    Content, DocumentFlags, EncryptionAlgorithm, EncryptionKey, EnumerateOptions, KeyStore,
    OnCompactCallback, Record,
};

/// Releases every registered storage engine's process-wide state.
///
/// Idempotent and safe to call with no open databases; calling it while a
/// database is open yields undefined results. Close all handles first.
pub fn shutdown() -> Result<()> {
    satchel_storage::engine::shutdown()?;
    Ok(())
}
