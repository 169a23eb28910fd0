//! Engine construction options (§6): not a config *loader* — no file/env
//! parsing lives here, only the in-process builder the engine consumes.

use std::path::PathBuf;

fn next_power_of_two(v: usize) -> usize {
    if v <= 1 { 1 } else { v.next_power_of_two() }
}

/// How the page cache (C3) is sized. See `spec.md` §6: `cache_size` 0 = null
/// cache, negative = unbounded, positive = bounded LRU capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSize {
    Null,
    Unbounded,
    Bounded(usize),
}

impl From<i64> for CacheSize {
    fn from(v: i64) -> Self {
        match v {
            0 => Self::Null,
            n if n < 0 => Self::Unbounded,
            n => Self::Bounded(n as usize),
        }
    }
}

/// Construction options for a [`crate::tree::BTreeEngine`] / [`crate::Store`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub file_name: PathBuf,
    pub order: usize,
    pub page_size: usize,
    pub key_size: usize,
    pub value_size: usize,
    pub cache_size: CacheSize,
    pub auto_commit: bool,
    pub checkpoint_interval_secs: u64,
    pub log_dir: Option<PathBuf>,
}

impl EngineOptions {
    #[must_use]
    pub fn new(file_name: impl Into<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
            order: 100,
            page_size: 4096,
            key_size: 64,
            value_size: 256,
            cache_size: CacheSize::Bounded(256),
            auto_commit: true,
            checkpoint_interval_secs: 0,
            log_dir: None,
        }
    }

    #[must_use]
    pub const fn order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    /// Rounded up to the next power of two per `spec.md` §6.
    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self {
        let rounded = next_power_of_two(page_size);
        if rounded != page_size {
            log::debug!("page_size {page_size} rounded up to {rounded}");
        }
        self.page_size = rounded;
        self
    }

    /// Rounded up to the next power of two per `spec.md` §6.
    #[must_use]
    pub fn key_size(mut self, key_size: usize) -> Self {
        let rounded = next_power_of_two(key_size);
        if rounded != key_size {
            log::debug!("key_size {key_size} rounded up to {rounded}");
        }
        self.key_size = rounded;
        self
    }

    /// Rounded up to the next power of two per `spec.md` §6.
    #[must_use]
    pub fn value_size(mut self, value_size: usize) -> Self {
        let rounded = next_power_of_two(value_size);
        if rounded != value_size {
            log::debug!("value_size {value_size} rounded up to {rounded}");
        }
        self.value_size = rounded;
        self
    }

    #[must_use]
    pub fn cache_size(mut self, cache_size: impl Into<CacheSize>) -> Self {
        self.cache_size = cache_size.into();
        self
    }

    #[must_use]
    pub const fn auto_commit(mut self, enabled: bool) -> Self {
        self.auto_commit = enabled;
        self
    }

    #[must_use]
    pub const fn checkpoint_interval_secs(mut self, secs: u64) -> Self {
        self.checkpoint_interval_secs = secs;
        self
    }

    #[must_use]
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// `<file_name>.cdb` — `file_name` is a path prefix, not a full path.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        let mut p = self.file_name.clone().into_os_string();
        p.push(".cdb");
        PathBuf::from(p)
    }

    /// `<file_name>.cdb.wal`.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        let mut p = self.data_path().into_os_string();
        p.push(".wal");
        PathBuf::from(p)
    }
}
