//! # Satchel Storage
//!
//! Storage engine capability layer for Satchel.
//!
//! This crate defines the interfaces the database facade consumes from a
//! storage engine:
//!
//! - [`DataFile`] - one database on disk: open/close, compact, rekey,
//!   delete, key-store access, transactions
//! - [`KeyStore`] - a named namespace of records inside a data file
//! - [`EngineTransaction`] - the single write transaction a data file
//!   vends at a time
//!
//! Engines are registered process-wide by tag (see [`engine`]) and are
//! selected when a database is opened. The crate ships a built-in
//! single-file record-log engine that backs both registered tags; real
//! engines can be swapped in behind the same capability.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod crypto;
mod datafile;
pub mod engine;
mod error;
mod logfile;
mod record;

pub use crypto::{EncryptionAlgorithm, EncryptionKey, KEY_SIZE};
pub use datafile::{
    DataFile, DataFileOptions, EngineTransaction, KeyStore, KeyStoreAttributes, OnCompactCallback,
};
pub use error::{StorageError, StorageResult};
pub use logfile::LogDataFile;
pub use record::{Content, DocumentFlags, EnumerateOptions, Record};
