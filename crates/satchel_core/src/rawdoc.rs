//! Raw key/value records in named stores.
//!
//! Raw documents carry auxiliary data next to the user documents: local
//! docs, replication checkpoints, expiration markers. They live in
//! arbitrary named stores and bypass the document layer entirely.

use crate::database::Database;
use crate::error::{Error, Result};

/// An owned copy of a raw record: key, metadata, and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    /// Record key.
    pub key: Vec<u8>,
    /// Metadata bytes (may be empty).
    pub meta: Vec<u8>,
    /// Body bytes (may be empty).
    pub body: Vec<u8>,
}

impl Database {
    /// Looks up a raw record in the named store (created if absent).
    ///
    /// Fails with `NotFound` when the key has no record. The returned
    /// document owns copies of the stored bytes.
    pub fn raw_get(&self, store: &str, key: &[u8]) -> Result<RawDocument> {
        let data = self.data.lock();
        let store = data.key_store(store)?;
        match store.get(key)? {
            Some(record) => Ok(RawDocument {
                key: record.key,
                meta: record.meta,
                body: record.body,
            }),
            None => Err(Error::NotFound),
        }
    }

    /// Writes (or deletes) a raw record in the named store.
    ///
    /// A non-empty `meta` or `body` stores the pair at `key`; both empty
    /// deletes the key. The write runs in its own transaction, which is
    /// committed exactly when the write succeeded; a write error
    /// propagates after the transaction has closed.
    pub fn raw_put(&self, store: &str, key: &[u8], meta: &[u8], body: &[u8]) -> Result<()> {
        self.begin_transaction()?;
        let result = {
            let data = self.data.lock();
            data.key_store(store)
                .map_err(Error::from)
                .and_then(|_| {
                    self.txns.with_current(|txn| {
                        if !meta.is_empty() || !body.is_empty() {
                            txn.set(store, key, meta, body)?;
                        } else {
                            txn.del(store, key)?;
                        }
                        Ok(())
                    })
                })
        };
        self.end_transaction(result.is_ok())?;
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{DatabaseConfig, DatabaseFlags};
    use crate::database::Database;
    use crate::error::Error;
    use tempfile::tempdir;

    fn open_db(dir: &tempfile::TempDir) -> std::sync::Arc<Database> {
        let config = DatabaseConfig::new().flags(DatabaseFlags::CREATE | DatabaseFlags::BUNDLED);
        Database::open(dir.path().join("db"), &config).unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        db.raw_put("checkpoints", b"remote", b"meta", b"body").unwrap();
        let doc = db.raw_get("checkpoints", b"remote").unwrap();
        assert_eq!(doc.key, b"remote");
        assert_eq!(doc.meta, b"meta");
        assert_eq!(doc.body, b"body");
    }

    #[test]
    fn get_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        assert!(matches!(
            db.raw_get("checkpoints", b"nope").err(),
            Some(Error::NotFound)
        ));
    }

    #[test]
    fn empty_put_deletes() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        db.raw_put("local", b"k", b"", b"value").unwrap();
        db.raw_put("local", b"k", b"", b"").unwrap();
        assert!(matches!(
            db.raw_get("local", b"k").err(),
            Some(Error::NotFound)
        ));
    }

    #[test]
    fn meta_only_record_is_stored() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        db.raw_put("local", b"k", b"just-meta", b"").unwrap();
        let doc = db.raw_get("local", b"k").unwrap();
        assert_eq!(doc.meta, b"just-meta");
        assert!(doc.body.is_empty());
    }

    #[test]
    fn raw_put_inside_open_transaction_nests() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        db.begin_transaction().unwrap();
        db.raw_put("local", b"k", b"", b"v").unwrap();
        // Outer transaction still open; outer abort discards the write.
        db.end_transaction(false).unwrap();
        assert!(matches!(
            db.raw_get("local", b"k").err(),
            Some(Error::NotFound)
        ));
    }
}
