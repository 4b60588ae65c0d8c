//! The data-file capability consumed by the database facade.

use crate::crypto::{EncryptionAlgorithm, EncryptionKey};
use crate::error::StorageResult;
use crate::record::{EnumerateOptions, Record};
use std::path::Path;

/// Callback invoked when compaction starts (`true`) and ends (`false`).
///
/// May run on a thread other than the caller's. The callback must not
/// re-enter the data file or the handle that owns it.
pub type OnCompactCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Per-store attributes fixed when a data file is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyStoreAttributes {
    /// Stores assign monotonic sequences to writes.
    pub sequences: bool,
    /// Deletions keep a tombstone record instead of purging.
    pub soft_deletes: bool,
    /// Records can be fetched by their file offset (legacy schema only).
    pub get_by_offset: bool,
}

/// Options for opening a data file.
#[derive(Debug, Clone, Default)]
pub struct DataFileOptions {
    /// Create the file if it does not exist.
    pub create: bool,
    /// Open for writing.
    pub writeable: bool,
    /// Encryption applied to the file contents.
    pub encryption_algorithm: EncryptionAlgorithm,
    /// Key material when `encryption_algorithm` is not `None`.
    pub encryption_key: Option<EncryptionKey>,
    /// Attributes of the key stores in this file.
    pub key_stores: KeyStoreAttributes,
}

/// One database on disk, as seen by the facade.
///
/// A data file vends at most one [`EngineTransaction`] at a time; the
/// caller is responsible for serializing access beyond that guarantee.
pub trait DataFile: Send + Sync {
    /// Filesystem path of the main database file.
    fn file_path(&self) -> &Path;

    /// The options this file was opened with.
    fn options(&self) -> &DataFileOptions;

    /// Whether the file is still open.
    fn is_open(&self) -> bool;

    /// Flushes and closes the file. Further operations fail with `Closed`.
    fn close(&self) -> StorageResult<()>;

    /// Closes the file if open and removes its on-disk files.
    fn delete_data_file(&self) -> StorageResult<()>;

    /// Rewrites the file, dropping dead space. Invokes the on-compact
    /// callback around the rewrite.
    fn compact(&self) -> StorageResult<()>;

    /// Whether a compaction is currently running.
    fn is_compacting(&self) -> bool;

    /// Atomically re-encrypts the file under a new algorithm and key.
    fn rekey(&self, algorithm: EncryptionAlgorithm, key: Option<EncryptionKey>)
        -> StorageResult<()>;

    /// Returns a handle to the named key store, creating it if absent.
    fn key_store(&self, name: &str) -> StorageResult<Box<dyn KeyStore>>;

    /// Names of the key stores currently present.
    fn key_store_names(&self) -> StorageResult<Vec<String>>;

    /// Starts the data file's single write transaction.
    fn begin_transaction(&self) -> StorageResult<Box<dyn EngineTransaction>>;

    /// Installs (or clears) the compaction callback.
    fn set_on_compact(&self, callback: Option<OnCompactCallback>);
}

/// A named namespace of records inside a data file.
///
/// Key-store handles are cheap and stable: two handles for the same name
/// address the same logical store.
pub trait KeyStore: Send + Sync {
    /// The store's name.
    fn name(&self) -> &str;

    /// Looks up a record by key.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Record>>;

    /// The store's last assigned sequence, or 0 if nothing was written.
    fn last_sequence(&self) -> StorageResult<u64>;

    /// Returns records in key order, subject to `options`.
    fn enumerate(&self, options: &EnumerateOptions) -> StorageResult<Vec<Record>>;
}

/// The single write transaction of a data file.
///
/// Writes are staged and become visible atomically at commit. Dropping an
/// unfinished transaction aborts it.
pub trait EngineTransaction: Send {
    /// Stages a write of `{meta, body}` at `key` in the named store.
    fn set(&mut self, store: &str, key: &[u8], meta: &[u8], body: &[u8]) -> StorageResult<()>;

    /// Stages a removal of `key` from the named store. Returns whether the
    /// key existed at this point in the transaction (staged writes
    /// included).
    fn del(&mut self, store: &str, key: &[u8]) -> StorageResult<bool>;

    /// Applies all staged writes durably.
    fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discards all staged writes.
    fn abort(self: Box<Self>) -> StorageResult<()>;
}
