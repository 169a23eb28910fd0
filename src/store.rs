//! Public façade (C8): a thin wrapper over the B-tree engine. Deliberately
//! minimal — `spec.md` scopes this surface to open/get/insert/remove/
//! iterate/close and leaves richer query/transaction APIs to the engine
//! layer itself for callers who need them directly.

use crate::codec::Value;
use crate::config::EngineOptions;
use crate::errors::{DbError, DbResult};
use crate::tree::BTreeEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// An open, single-file key-value store.
pub struct Store {
    engine: Arc<BTreeEngine>,
    closed: AtomicBool,
    checkpoint_stop: Option<Arc<AtomicBool>>,
    checkpoint_thread: Option<JoinHandle<()>>,
}

impl Store {
    pub fn open(options: EngineOptions) -> DbResult<Self> {
        if let Some(dir) = &options.log_dir {
            let stem = options.file_name.file_stem().and_then(|s| s.to_str()).unwrap_or("cannon-tree");
            if let Err(e) = crate::logger::init_for_db_in(dir, stem) {
                log::debug!("log init skipped: {e}");
            }
        }
        let interval = options.checkpoint_interval_secs;
        let engine = Arc::new(BTreeEngine::open(&options)?);

        let (checkpoint_stop, checkpoint_thread) = if interval > 0 {
            let stop = Arc::new(AtomicBool::new(false));
            let thread_stop = stop.clone();
            let thread_engine = engine.clone();
            let period = Duration::from_secs(interval);
            let handle = std::thread::spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    std::thread::sleep(period);
                    if thread_stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Err(e) = thread_engine.checkpoint() {
                        log::warn!("background checkpoint failed: {e}");
                    }
                }
            });
            (Some(stop), Some(handle))
        } else {
            (None, None)
        };

        Ok(Self { engine, closed: AtomicBool::new(false), checkpoint_stop, checkpoint_thread })
    }

    /// Every op after [`Store::close`] fails with [`DbError::DatabaseClosed`]
    /// (`spec.md` §7) rather than touching the now-closed file handler.
    fn check_open(&self) -> DbResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(DbError::DatabaseClosed)
        } else {
            Ok(())
        }
    }

    pub fn get(&self, key: &Value) -> DbResult<Option<Value>> {
        self.check_open()?;
        self.engine.get(key)
    }

    pub fn insert(&self, key: Value, value: Value) -> DbResult<()> {
        self.check_open()?;
        self.engine.insert(key, value, false)
    }

    pub fn upsert(&self, key: Value, value: Value) -> DbResult<()> {
        self.check_open()?;
        self.engine.insert(key, value, true)
    }

    pub fn remove(&self, key: &Value) -> DbResult<()> {
        self.check_open()?;
        self.engine.remove(key)
    }

    #[must_use]
    pub fn contains(&self, key: &Value) -> bool {
        self.check_open().is_ok() && self.engine.contains(key)
    }

    pub fn iter(&self) -> DbResult<Vec<(Value, Value)>> {
        self.check_open()?;
        self.engine.iter()
    }

    pub fn flush(&self) -> DbResult<()> {
        self.check_open()?;
        self.engine.flush()
    }

    pub fn checkpoint(&self) -> DbResult<()> {
        self.check_open()?;
        self.engine.checkpoint()
    }

    /// Idempotent: a second call after the first returns `DatabaseClosed`
    /// rather than re-closing an already-closed file handler.
    pub fn close(&self) -> DbResult<()> {
        self.check_open()?;
        self.stop_checkpoint_thread();
        self.engine.close()?;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    #[must_use]
    pub fn engine(&self) -> &BTreeEngine {
        &self.engine
    }

    fn stop_checkpoint_thread(&self) {
        if let Some(stop) = &self.checkpoint_stop {
            stop.store(true, Ordering::Relaxed);
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.stop_checkpoint_thread();
        if let Some(handle) = self.checkpoint_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_insert_get_remove_round_trips() {
        let dir = tempdir().unwrap();
        let opts = EngineOptions::new(dir.path().join("db"));
        let store = Store::open(opts).unwrap();

        store.insert(Value::Str("name".into()), Value::Str("cannon".into())).unwrap();
        assert_eq!(store.get(&Value::Str("name".into())).unwrap(), Some(Value::Str("cannon".into())));

        store.upsert(Value::Str("name".into()), Value::Str("tree".into())).unwrap();
        assert_eq!(store.get(&Value::Str("name".into())).unwrap(), Some(Value::Str("tree".into())));

        store.remove(&Value::Str("name".into())).unwrap();
        assert_eq!(store.get(&Value::Str("name".into())).unwrap(), None);
    }

    #[test]
    fn ops_after_close_return_database_closed() {
        let dir = tempdir().unwrap();
        let opts = EngineOptions::new(dir.path().join("db"));
        let store = Store::open(opts).unwrap();
        store.insert(Value::Int(1), Value::Int(2)).unwrap();
        store.close().unwrap();

        assert!(matches!(store.get(&Value::Int(1)), Err(DbError::DatabaseClosed)));
        assert!(matches!(store.insert(Value::Int(2), Value::Int(3)), Err(DbError::DatabaseClosed)));
        assert!(matches!(store.close(), Err(DbError::DatabaseClosed)));
        assert!(!store.contains(&Value::Int(1)));
    }

    #[test]
    fn background_checkpoint_thread_runs_without_panicking() {
        let dir = tempdir().unwrap();
        let opts = EngineOptions::new(dir.path().join("db")).checkpoint_interval_secs(1);
        let store = Store::open(opts).unwrap();
        store.insert(Value::Int(1), Value::Int(2)).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(store.get(&Value::Int(1)).unwrap(), Some(Value::Int(2)));
    }
}
