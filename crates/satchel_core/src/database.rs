//! The database handle.

use crate::bundle;
use crate::config::{DatabaseConfig, DatabaseFlags, Schema};
use crate::error::{Error, Result};
use crate::transaction::TransactionController;
use parking_lot::Mutex;
use satchel_storage::{
    engine, DataFile, DataFileOptions, DocumentFlags, EncryptionAlgorithm, EncryptionKey,
    EnumerateOptions, KeyStore, OnCompactCallback,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the key store holding user documents.
pub const DEFAULT_KEY_STORE: &str = "default";
/// Name of the key store holding document expiration records.
pub const EXPIRY_KEY_STORE: &str = "expiry";

/// An open database.
///
/// Handles are shared by reference counting: `Database::open` returns an
/// [`Arc`], callers retain with `Arc::clone`, and the strong count is the
/// handle's reference count. [`Database::delete`] requires the count to be
/// exactly one; [`Database::release`] is the checked way to drop a
/// reference.
///
/// All verbs that touch the data file serialize on an internal mutex, so a
/// handle may be used from several threads. Transactions nest per thread;
/// see [`Database::begin_transaction`].
///
/// # Example
///
/// ```rust,ignore
/// use satchel_core::{Database, DatabaseConfig, DatabaseFlags};
///
/// let config = DatabaseConfig::new()
///     .flags(DatabaseFlags::CREATE | DatabaseFlags::BUNDLED);
/// let db = Database::open("my_database", &config)?;
///
/// db.begin_transaction()?;
/// db.raw_put("info", b"greeting", b"", b"hello")?;
/// db.end_transaction(true)?;
///
/// db.close()?;
/// Database::release(db)?;
/// ```
pub struct Database {
    config: DatabaseConfig,
    path: PathBuf,
    schema: Schema,
    pub(crate) data: Mutex<Box<dyn DataFile>>,
    pub(crate) txns: TransactionController,
}

impl Database {
    /// Opens a database at `path`.
    ///
    /// The path is a bundle directory under [`DatabaseFlags::BUNDLED`],
    /// otherwise the database file itself. The returned handle has a
    /// reference count of one.
    ///
    /// # Errors
    ///
    /// - `NotFound` / `WrongFormat` from bundle resolution
    /// - `InvalidParameter` for an unknown engine tag in a bundle
    /// - `Unimplemented` for an unknown engine tag at construction
    /// - `CantOpenFile` when the file is locked by another handle
    /// - `Crypto` when the encryption key does not match the file
    pub fn open(path: impl AsRef<Path>, config: &DatabaseConfig) -> Result<Arc<Self>> {
        let mut config = config.clone();
        let file_path = bundle::resolve_database_path(path.as_ref(), &mut config)?;
        let tag = config
            .storage_engine
            .clone()
            .unwrap_or_else(|| engine::DEFAULT_ENGINE.to_string());

        let options = Self::data_file_options(&config, true);
        let data = engine::open_data_file(&tag, &file_path, options)?;
        tracing::info!(path = %file_path.display(), engine = %tag, "opened database");

        Ok(Arc::new(Self {
            schema: config.schema(),
            config,
            path: file_path,
            data: Mutex::new(data),
            txns: TransactionController::new(),
        }))
    }

    /// Builds the engine options for a data file. The main database's
    /// default store tracks sequences and soft deletes; get-by-offset is a
    /// V1-schema capability.
    fn data_file_options(config: &DatabaseConfig, is_main_db: bool) -> DataFileOptions {
        let mut options = DataFileOptions {
            create: config.flags.contains(DatabaseFlags::CREATE),
            writeable: !config.flags.contains(DatabaseFlags::READ_ONLY),
            ..DataFileOptions::default()
        };
        if is_main_db {
            options.key_stores.sequences = true;
            options.key_stores.soft_deletes = true;
            options.key_stores.get_by_offset = config.schema() == Schema::V1;
        }
        if let Some(key) = &config.encryption_key {
            options.encryption_algorithm = EncryptionAlgorithm::Aes256;
            options.encryption_key = Some(key.clone());
        }
        options
    }

    /// Closes the data file. The handle stays addressable (path, config)
    /// but is terminal: it cannot be reopened, only released or deleted.
    ///
    /// Fails with `TransactionNotClosed` while a transaction is open.
    pub fn close(&self) -> Result<()> {
        self.txns.must_not_be_in_transaction()?;
        self.data.lock().close()?;
        Ok(())
    }

    /// Releases one reference, dropping the handle when it is the last.
    ///
    /// Fails with `TransactionNotClosed` while a transaction is open, in
    /// which case the reference is returned to the caller.
    pub fn release(this: Arc<Self>) -> std::result::Result<(), (Arc<Self>, Error)> {
        match this.txns.must_not_be_in_transaction() {
            Ok(()) => {
                drop(this);
                Ok(())
            }
            Err(e) => Err((this, e)),
        }
    }

    /// Deletes the database's on-disk files.
    ///
    /// Fails with `TransactionNotClosed` while a transaction is open and
    /// with `Busy` while other references to the handle exist.
    pub fn delete(this: &Arc<Self>) -> Result<()> {
        this.txns.must_not_be_in_transaction()?;
        if Arc::strong_count(this) > 1 {
            return Err(Error::Busy);
        }
        this.data.lock().delete_data_file()?;
        tracing::info!(path = %this.path.display(), "deleted database");
        Ok(())
    }

    /// Deletes the database files at `path` without opening them.
    pub fn delete_at_path(path: impl AsRef<Path>, config: &DatabaseConfig) -> Result<()> {
        let path = path.as_ref();
        if config.flags.contains(DatabaseFlags::BUNDLED) {
            if path.is_dir() {
                std::fs::remove_dir_all(path)?;
            } else if path.exists() {
                return Err(Error::wrong_format(format!(
                    "bundle path is not a directory: {}",
                    path.display()
                )));
            }
            return Ok(());
        }
        let tag = config
            .storage_engine
            .as_deref()
            .unwrap_or(engine::DEFAULT_ENGINE);
        engine::delete_at_path(tag, path)?;
        Ok(())
    }

    /// Reorganizes the data file on disk, reclaiming space.
    ///
    /// Fails with `TransactionNotClosed` while a transaction is open. The
    /// registered on-compact callback observes the start and end of the
    /// rewrite.
    pub fn compact(&self) -> Result<()> {
        self.txns.must_not_be_in_transaction()?;
        self.data.lock().compact()?;
        Ok(())
    }

    /// Whether a compaction is currently running.
    #[must_use]
    pub fn is_compacting(&self) -> bool {
        self.data.lock().is_compacting()
    }

    /// Registers (or clears) the compaction callback.
    ///
    /// The callback receives `true` when compaction starts and `false`
    /// when it ends, possibly on another thread. It must not call back
    /// into this handle.
    pub fn set_on_compact(&self, callback: Option<OnCompactCallback>) {
        self.data.lock().set_on_compact(callback);
    }

    /// Atomically changes the encryption key. `None` decrypts the file.
    ///
    /// After a successful rekey, opening the file requires the new key.
    /// Fails with `TransactionNotClosed` while a transaction is open.
    pub fn rekey(&self, new_key: Option<EncryptionKey>) -> Result<()> {
        self.txns.must_not_be_in_transaction()?;
        let (algorithm, key) = match new_key {
            Some(key) => (EncryptionAlgorithm::Aes256, Some(key)),
            None => (EncryptionAlgorithm::None, None),
        };
        self.data.lock().rekey(algorithm, key)?;
        Ok(())
    }

    /// The resolved filesystem path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored configuration, with the resolved engine tag filled in.
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The schema variant fixed at open.
    #[must_use]
    pub fn schema(&self) -> Schema {
        self.schema
    }

    /// Checks that the database uses the given schema.
    pub fn must_be_schema(&self, schema: Schema) -> Result<()> {
        if self.schema == schema {
            Ok(())
        } else {
            Err(Error::Unsupported)
        }
    }

    /// Whether the data file is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.data.lock().is_open()
    }

    /// Counts the non-deleted documents in the default store.
    ///
    /// Deleted documents are those whose metadata flags carry
    /// [`DocumentFlags::DELETED`]; the scan reads metadata only.
    pub fn document_count(&self) -> Result<u64> {
        let data = self.data.lock();
        let store = data.key_store(DEFAULT_KEY_STORE)?;
        let records = store.enumerate(&EnumerateOptions::meta_only())?;
        Ok(records
            .iter()
            .filter(|r| !r.flags().contains(DocumentFlags::DELETED))
            .count() as u64)
    }

    /// The default store's last assigned sequence.
    pub fn last_sequence(&self) -> Result<u64> {
        let data = self.data.lock();
        let store = data.key_store(DEFAULT_KEY_STORE)?;
        Ok(store.last_sequence()?)
    }

    /// Returns a handle to the named key store, creating it if absent.
    ///
    /// Handles for the same name address the same logical store.
    pub fn key_store(&self, name: &str) -> Result<Box<dyn KeyStore>> {
        Ok(self.data.lock().key_store(name)?)
    }

    /// Removes a document from the default store.
    ///
    /// Must be called inside a transaction. Fails with `NotFound` when the
    /// document does not exist.
    pub fn purge_doc(&self, doc_id: &[u8]) -> Result<()> {
        let _data = self.data.lock();
        self.txns.with_current(|txn| {
            if txn.del(DEFAULT_KEY_STORE, doc_id)? {
                Ok(())
            } else {
                Err(Error::NotFound)
            }
        })
    }

    /// Begins a transaction, or nests into the calling thread's open one.
    ///
    /// Transactions are recursive per thread; only the outermost
    /// [`end_transaction`](Self::end_transaction) commits or aborts. A
    /// `begin` from another thread blocks until the current transaction
    /// closes.
    pub fn begin_transaction(&self) -> Result<()> {
        self.txns.begin(&self.data)
    }

    /// Ends one level of transaction.
    ///
    /// Returns `Ok(false)` if the calling thread had no open transaction.
    /// At the outermost level, `commit == false` aborts; an inner level's
    /// `commit` argument does not latch the outer decision.
    pub fn end_transaction(&self, commit: bool) -> Result<bool> {
        self.txns.end(commit, &self.data)
    }

    /// Whether any thread has an open transaction on this handle.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.txns.in_transaction()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("schema", &self.schema)
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}
