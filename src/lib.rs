#![forbid(unsafe_code)]
//! cannon-tree: an embedded, single-file key-value store backed by a
//! disk-paged B-tree, an LRU page cache, and a write-ahead log.
//!
//! The public surface is [`Store`]: open a `.cdb` file, then
//! get/insert/upsert/remove/iterate/flush/checkpoint/close. Everything
//! below that — the codec, node model, cache, WAL, file handler, B-tree
//! engine, and transaction guards — is exposed for callers who need the
//! engine directly, but [`Store`] is the façade most callers want.

pub mod cache;
pub mod codec;
pub mod config;
pub mod errors;
pub mod handler;
pub mod layout;
pub mod logger;
pub mod node;
pub mod store;
pub mod tree;
pub mod txn;
pub mod wal;

pub use codec::Value;
pub use config::{CacheSize, EngineOptions};
pub use errors::{DbError, DbResult};
pub use store::Store;
pub use tree::BTreeEngine;

/// Initialize the `log` facade from `log4rs.yaml` in the working
/// directory, if present. Callers that want a guaranteed per-database
/// log file should pass [`EngineOptions::log_dir`] to [`Store::open`]
/// instead, which drives [`logger::init_for_db_in`] directly.
pub fn init() {
    logger::init();
}
