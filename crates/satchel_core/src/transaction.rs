//! Transaction nesting and serialization.
//!
//! Callers see recursive transactions; the data file sees exactly one.
//! The outermost `begin` creates the engine transaction, inner levels
//! only move a counter, and only the outermost `end` commits or aborts.
//! Ownership is per thread: once a thread holds the transaction, other
//! threads' `begin` calls block until it is fully closed, and only the
//! owning thread can stage writes or close it.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use satchel_storage::{DataFile, EngineTransaction};
use std::thread::{self, ThreadId};

struct TxnState {
    owner: Option<ThreadId>,
    depth: u32,
    txn: Option<Box<dyn EngineTransaction>>,
}

pub(crate) struct TransactionController {
    state: Mutex<TxnState>,
    cond: Condvar,
}

impl TransactionController {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TxnState {
                owner: None,
                depth: 0,
                txn: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// Begins (or nests into) a transaction on the calling thread.
    ///
    /// Blocks while another thread owns the transaction. On the 0→1
    /// transition the engine transaction is created under the data-file
    /// lock.
    pub(crate) fn begin(&self, data: &Mutex<Box<dyn DataFile>>) -> Result<()> {
        let me = thread::current().id();
        {
            let mut state = self.state.lock();
            while state.owner.is_some_and(|owner| owner != me) {
                self.cond.wait(&mut state);
            }
            state.owner.get_or_insert(me);
            state.depth += 1;
            if state.depth > 1 {
                return Ok(());
            }
        }

        // Outermost begin. The slot is claimed, so no other thread can
        // race us; take the locks in data-file then state order.
        match data.lock().begin_transaction() {
            Ok(txn) => {
                self.state.lock().txn = Some(txn);
                Ok(())
            }
            Err(e) => {
                {
                    let mut state = self.state.lock();
                    state.depth = 0;
                    state.owner = None;
                }
                self.cond.notify_all();
                Err(e.into())
            }
        }
    }

    /// Ends one level of transaction. Returns `Ok(false)` when the calling
    /// thread has no open transaction.
    ///
    /// Only the outermost end touches the engine: it aborts when `commit`
    /// is false and commits otherwise. An inner end's `commit` argument
    /// has no effect on the outer decision.
    pub(crate) fn end(&self, commit: bool, data: &Mutex<Box<dyn DataFile>>) -> Result<bool> {
        let me = thread::current().id();
        let txn = {
            let mut state = self.state.lock();
            if state.owner != Some(me) || state.depth == 0 {
                return Ok(false);
            }
            state.depth -= 1;
            if state.depth > 0 {
                return Ok(true);
            }
            state.txn.take()
        };

        let result = match txn {
            Some(txn) => {
                let _data = data.lock();
                if commit {
                    txn.commit()
                } else {
                    txn.abort()
                }
            }
            None => Ok(()),
        };

        self.state.lock().owner = None;
        self.cond.notify_all();
        result.map(|()| true).map_err(Into::into)
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.state.lock().depth > 0
    }

    /// Fails with `TransactionNotClosed` if any thread has an open
    /// transaction. Destructive verbs call this first.
    pub(crate) fn must_not_be_in_transaction(&self) -> Result<()> {
        if self.in_transaction() {
            Err(Error::TransactionNotClosed)
        } else {
            Ok(())
        }
    }

    /// Runs `f` against the live engine transaction. Fails with
    /// `NotInTransaction` unless the calling thread owns one.
    pub(crate) fn with_current<R>(
        &self,
        f: impl FnOnce(&mut dyn EngineTransaction) -> Result<R>,
    ) -> Result<R> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return Err(Error::NotInTransaction);
        }
        match state.txn.as_mut() {
            Some(txn) => f(txn.as_mut()),
            None => Err(Error::NotInTransaction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_storage::{engine, DataFileOptions};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn open_data(dir: &tempfile::TempDir) -> Mutex<Box<dyn DataFile>> {
        let data = engine::open_data_file(
            engine::DEFAULT_ENGINE,
            &dir.path().join("db.sqlite3"),
            DataFileOptions {
                create: true,
                writeable: true,
                ..DataFileOptions::default()
            },
        )
        .unwrap();
        Mutex::new(data)
    }

    #[test]
    fn begin_end_round_trip() {
        let dir = tempdir().unwrap();
        let data = open_data(&dir);
        let txns = TransactionController::new();

        assert!(!txns.in_transaction());
        txns.begin(&data).unwrap();
        assert!(txns.in_transaction());
        assert!(txns.end(true, &data).unwrap());
        assert!(!txns.in_transaction());
    }

    #[test]
    fn end_without_begin_returns_false() {
        let dir = tempdir().unwrap();
        let data = open_data(&dir);
        let txns = TransactionController::new();
        assert!(!txns.end(true, &data).unwrap());
    }

    #[test]
    fn nesting_counts_levels() {
        let dir = tempdir().unwrap();
        let data = open_data(&dir);
        let txns = TransactionController::new();

        txns.begin(&data).unwrap();
        txns.begin(&data).unwrap();
        assert!(txns.end(true, &data).unwrap());
        assert!(txns.in_transaction());
        assert!(txns.end(true, &data).unwrap());
        assert!(!txns.in_transaction());
    }

    #[test]
    fn inner_abort_does_not_latch() {
        let dir = tempdir().unwrap();
        let data = open_data(&dir);
        let txns = TransactionController::new();

        txns.begin(&data).unwrap();
        txns.begin(&data).unwrap();
        txns.with_current(|t| {
            t.set("default", b"k", &[], b"v")?;
            Ok(())
        })
        .unwrap();
        // Inner end asks for abort; the outer commit still wins.
        assert!(txns.end(false, &data).unwrap());
        assert!(txns.end(true, &data).unwrap());

        let store = data.lock().key_store("default").unwrap();
        assert!(store.get(b"k").unwrap().is_some());
    }

    #[test]
    fn outer_abort_discards_writes() {
        let dir = tempdir().unwrap();
        let data = open_data(&dir);
        let txns = TransactionController::new();

        txns.begin(&data).unwrap();
        txns.with_current(|t| {
            t.set("default", b"k", &[], b"v")?;
            Ok(())
        })
        .unwrap();
        assert!(txns.end(false, &data).unwrap());

        let store = data.lock().key_store("default").unwrap();
        assert!(store.get(b"k").unwrap().is_none());
    }

    #[test]
    fn with_current_outside_transaction_fails() {
        let txns = TransactionController::new();
        let result = txns.with_current(|_| Ok(()));
        assert!(matches!(result.err(), Some(Error::NotInTransaction)));
    }

    #[test]
    fn other_thread_blocks_until_closed() {
        let dir = tempdir().unwrap();
        let data = Arc::new(open_data(&dir));
        let txns = Arc::new(TransactionController::new());

        txns.begin(&data).unwrap();
        txns.with_current(|t| {
            t.set("default", b"k", &[], b"first")?;
            Ok(())
        })
        .unwrap();

        let data2 = Arc::clone(&data);
        let txns2 = Arc::clone(&txns);
        let waiter = std::thread::spawn(move || {
            // Blocks until the main thread's transaction closes.
            txns2.begin(&data2).unwrap();
            txns2
                .with_current(|t| {
                    t.set("default", b"k", &[], b"second")?;
                    Ok(())
                })
                .unwrap();
            txns2.end(true, &data2).unwrap();
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!waiter.is_finished());
        txns.end(true, &data).unwrap();
        waiter.join().unwrap();

        let store = data.lock().key_store("default").unwrap();
        assert_eq!(store.get(b"k").unwrap().unwrap().body, b"second");
    }

    #[test]
    fn non_owner_end_returns_false() {
        let dir = tempdir().unwrap();
        let data = Arc::new(open_data(&dir));
        let txns = Arc::new(TransactionController::new());

        txns.begin(&data).unwrap();
        let data2 = Arc::clone(&data);
        let txns2 = Arc::clone(&txns);
        std::thread::spawn(move || txns2.end(true, &data2).unwrap())
            .join()
            .map(|ended| assert!(!ended))
            .unwrap();
        assert!(txns.in_transaction());
        txns.end(false, &data).unwrap();
    }
}
