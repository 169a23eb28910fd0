//! Transactions (C7): RAII guards over the file handler's reader/writer
//! lock. One writer or many readers, never both, per `spec.md` §5.
//!
//! Grounded in `cannondb/handler.py`'s `write_transaction`/
//! `read_transaction` context managers: a writer commits on a clean
//! exit (when `auto_commit` is set) and rolls back — clearing the page
//! cache — on an abnormal one; a reader only acquires and releases the
//! shared lock.

use crate::errors::DbResult;
use crate::handler::FileHandler;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};
use std::sync::Arc;

/// A held write lock, paired with the commit/rollback policy to run on
/// drop. Construct via [`WriteTxn::begin`].
pub struct WriteTxn {
    handler: Arc<FileHandler>,
    _guard: ArcRwLockWriteGuard<RawRwLock, ()>,
    auto_commit: bool,
    ok: bool,
}

impl WriteTxn {
    #[must_use]
    pub fn begin(handler: Arc<FileHandler>, lock: Arc<RwLock<()>>, auto_commit: bool) -> Self {
        let guard = RwLock::write_arc(&lock);
        Self { handler, _guard: guard, auto_commit, ok: true }
    }

    /// Mark this transaction as having failed; `Drop` will roll back
    /// instead of committing even if `auto_commit` is set.
    pub fn mark_failed(&mut self) {
        self.ok = false;
    }

    pub fn commit(&self) -> DbResult<()> {
        self.handler.commit()
    }

    pub fn rollback(&self) -> DbResult<()> {
        self.handler.rollback()
    }
}

impl Drop for WriteTxn {
    fn drop(&mut self) {
        let result = if !self.ok {
            self.handler.rollback()
        } else if self.auto_commit {
            self.handler.commit()
        } else {
            Ok(())
        };
        if let Err(e) = result {
            log::error!("write transaction cleanup failed: {e}");
        }
    }
}

/// A held read lock. Acquire and release only — no commit/rollback
/// semantics apply to readers.
pub struct ReadTxn {
    _guard: ArcRwLockReadGuard<RawRwLock, ()>,
}

impl ReadTxn {
    #[must_use]
    pub fn begin(lock: Arc<RwLock<()>>) -> Self {
        Self { _guard: RwLock::read_arc(&lock) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use tempfile::tempdir;

    fn handler(dir: &std::path::Path) -> Arc<FileHandler> {
        let opts = EngineOptions::new(dir.join("db")).page_size(128).key_size(16).value_size(32);
        Arc::new(FileHandler::open(&opts).unwrap())
    }

    #[test]
    fn write_txn_commits_on_clean_drop() {
        let dir = tempdir().unwrap();
        let h = handler(dir.path());
        let lock = Arc::new(RwLock::new(()));
        {
            let txn = WriteTxn::begin(h.clone(), lock.clone(), true);
            drop(txn);
        }
        // a second writer can proceed without deadlocking
        let _txn2 = WriteTxn::begin(h, lock, true);
    }

    #[test]
    fn write_txn_rolls_back_when_marked_failed() {
        let dir = tempdir().unwrap();
        let h = handler(dir.path());
        let lock = Arc::new(RwLock::new(()));
        let mut txn = WriteTxn::begin(h, lock, true);
        txn.mark_failed();
    }

    #[test]
    fn read_txn_acquire_release_round_trips() {
        let dir = tempdir().unwrap();
        let h = handler(dir.path());
        let _ = h;
        let lock = Arc::new(RwLock::new(()));
        let r1 = ReadTxn::begin(lock.clone());
        let r2 = ReadTxn::begin(lock.clone());
        drop(r1);
        drop(r2);
    }
}
