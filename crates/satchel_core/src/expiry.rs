//! Document expiration records.
//!
//! The expiry store holds two records per expiring document: a timeline
//! entry keyed by the collatable array `[timestamp, doc_id]` with an empty
//! body, and a marker keyed by the raw doc id whose body is the collatable
//! timestamp. Timeline keys order by timestamp and sort ahead of raw doc
//! ids, so the next expiration is the first record of the store.

use crate::collate::{CollatableReader, CollatableWriter};
use crate::database::{Database, EXPIRY_KEY_STORE};
use crate::error::Result;
use satchel_storage::EnumerateOptions;

fn timeline_key(timestamp: u64, doc_id: &[u8]) -> Vec<u8> {
    let mut writer = CollatableWriter::new();
    writer.begin_array().number(timestamp).bytes(doc_id).end_array();
    writer.into_bytes()
}

fn marker_body(timestamp: u64) -> Vec<u8> {
    let mut writer = CollatableWriter::new();
    writer.number(timestamp);
    writer.into_bytes()
}

impl Database {
    /// The earliest expiration timestamp of any document, or 0 when no
    /// document expires.
    pub fn next_doc_expiration(&self) -> Result<u64> {
        let data = self.data.lock();
        let store = data.key_store(EXPIRY_KEY_STORE)?;
        let records = store.enumerate(&EnumerateOptions::default())?;
        match records.first() {
            Some(record) if record.body.is_empty() => {
                let mut reader = CollatableReader::new(&record.key);
                reader.begin_array()?;
                reader.number()
            }
            _ => Ok(0),
        }
    }

    /// Sets (or clears, with `timestamp == 0`) a document's expiration
    /// time. Runs in its own transaction; replacing an earlier expiration
    /// removes its timeline entry.
    pub fn set_doc_expiration(&self, doc_id: &[u8], timestamp: u64) -> Result<()> {
        self.begin_transaction()?;
        let result = {
            let data = self.data.lock();
            data.key_store(EXPIRY_KEY_STORE)
                .map_err(crate::Error::from)
                .and_then(|store| {
                    let existing = store.get(doc_id)?;
                    self.txns.with_current(|txn| {
                        if let Some(marker) = existing {
                            let old = CollatableReader::new(&marker.body).number()?;
                            txn.del(EXPIRY_KEY_STORE, &timeline_key(old, doc_id))?;
                        }
                        if timestamp > 0 {
                            txn.set(EXPIRY_KEY_STORE, &timeline_key(timestamp, doc_id), &[], &[])?;
                            txn.set(EXPIRY_KEY_STORE, doc_id, &[], &marker_body(timestamp))?;
                        } else {
                            txn.del(EXPIRY_KEY_STORE, doc_id)?;
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
    use super::*;
    use crate::config::{DatabaseConfig, DatabaseFlags};
    use tempfile::tempdir;

    fn open_db(dir: &tempfile::TempDir) -> std::sync::Arc<Database> {
        let config = DatabaseConfig::new().flags(DatabaseFlags::CREATE | DatabaseFlags::BUNDLED);
        Database::open(dir.path().join("db"), &config).unwrap()
    }

    #[test]
    fn empty_store_has_no_expiration() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        assert_eq!(db.next_doc_expiration().unwrap(), 0);
    }

    #[test]
    fn earliest_expiration_wins() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        db.set_doc_expiration(b"late", 9_000).unwrap();
        db.set_doc_expiration(b"early", 1_000).unwrap();
        db.set_doc_expiration(b"middle", 5_000).unwrap();

        assert_eq!(db.next_doc_expiration().unwrap(), 1_000);
    }

    #[test]
    fn replacing_an_expiration_drops_the_old_entry() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        db.set_doc_expiration(b"doc", 1_000).unwrap();
        db.set_doc_expiration(b"doc", 8_000).unwrap();
        assert_eq!(db.next_doc_expiration().unwrap(), 8_000);
    }

    #[test]
    fn clearing_removes_both_records() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        db.set_doc_expiration(b"doc", 1_000).unwrap();
        db.set_doc_expiration(b"doc", 0).unwrap();
        assert_eq!(db.next_doc_expiration().unwrap(), 0);

        let store = db.key_store(EXPIRY_KEY_STORE).unwrap();
        assert!(store
            .enumerate(&EnumerateOptions::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn non_timeline_first_record_reads_as_zero() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        // A record with a body and a key that sorts ahead of any timeline
        // entry: nothing to expire.
        db.raw_put(EXPIRY_KEY_STORE, b"\x01stray", b"", b"body").unwrap();
        assert_eq!(db.next_doc_expiration().unwrap(), 0);
    }

    #[test]
    fn big_timestamps_round_trip() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        let millis = 1_764_500_000_000u64;
        db.set_doc_expiration(b"doc", millis).unwrap();
        assert_eq!(db.next_doc_expiration().unwrap(), millis);
    }
}
