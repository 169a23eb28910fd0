//! File handler (C5): owns the data-file handle, the WAL, the page
//! cache, the tree-configuration metadata page, and the deprecated-page
//! freelist. Mediates every node access as cache → WAL → data file.
//!
//! Grounded in `cannondb/handler.py`'s `FileHandler`, with the WAL-bypass
//! that draft leaves commented out on `set_node`/`get_node` implemented
//! live instead (`spec.md` §4.5 is unambiguous that writes go through
//! the WAL) and the `flush()` cache-snapshot-before-clear ordering
//! (`spec.md` §9's explicitly flagged hazard) ported as-is.

use crate::cache::{self, PageCache};
use crate::config::EngineOptions;
use crate::errors::{DbError, DbResult};
use crate::layout::*;
use crate::node::{self, BNode, PageIo};
use crate::wal::Wal;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Immutable per-database tree configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConf {
    pub order: usize,
    pub page_size: usize,
    pub key_size: usize,
    pub value_size: usize,
}

const META_HEADER_LEN: usize =
    PAGE_ADDRESS_LIMIT + NODE_TYPE_LENGTH_LIMIT + PAGE_LENGTH_LIMIT + KEY_LENGTH_LIMIT + VALUE_LENGTH_LIMIT;

struct Inner {
    data_file: File,
    wal: Wal,
    cache: Box<dyn PageCache>,
    freelist: BTreeSet<u32>,
    last_page: u32,
}

impl Inner {
    fn read_data_page(&mut self, page: u32, page_size: usize) -> DbResult<Vec<u8>> {
        let mut buf = vec![0u8; page_size];
        self.data_file.seek(SeekFrom::Start(u64::from(page) * page_size as u64))?;
        match self.data_file.read_exact(&mut buf) {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(vec![0u8; page_size]),
            Err(e) => Err(e.into()),
        }
    }

    fn write_data_page(&mut self, page: u32, bytes: &[u8]) -> DbResult<()> {
        self.data_file.seek(SeekFrom::Start(u64::from(page) * bytes.len() as u64))?;
        self.data_file.write_all(bytes)?;
        Ok(())
    }

    /// Raw page read: WAL first (it may hold a newer, not-yet-checkpointed
    /// image), falling back to the data file.
    fn read_raw_page(&mut self, page: u32, page_size: usize) -> DbResult<Vec<u8>> {
        if let Some(bytes) = self.wal.get_page(page)? {
            return Ok(bytes);
        }
        self.read_data_page(page, page_size)
    }

    fn alloc_page(&mut self) -> DbResult<u32> {
        if let Some(page) = self.freelist.iter().next().copied() {
            self.freelist.remove(&page);
            Ok(page)
        } else {
            self.last_page += 1;
            Ok(self.last_page)
        }
    }

    fn deprecate_page(&mut self, page: u32, page_size: usize) -> DbResult<()> {
        let mut bytes = self.read_raw_page(page, page_size)?;
        bytes[0] = PAGE_TYPE_DEPRECATED;
        self.wal.set_page(page, &bytes)?;
        self.freelist.insert(page);
        Ok(())
    }
}

struct IoCtx<'a> {
    inner: &'a mut Inner,
    page_size: usize,
}

impl PageIo for IoCtx<'_> {
    fn page_size(&self) -> usize {
        self.page_size
    }
    fn alloc_page(&mut self) -> DbResult<u32> {
        self.inner.alloc_page()
    }
    fn write_page_bytes(&mut self, page: u32, bytes: &[u8]) -> DbResult<()> {
        self.inner.wal.set_page(page, bytes)
    }
    fn read_page_bytes(&mut self, page: u32) -> DbResult<Vec<u8>> {
        self.inner.read_raw_page(page, self.page_size)
    }
    fn deprecate_page(&mut self, page: u32) -> DbResult<()> {
        self.inner.deprecate_page(page, self.page_size)
    }
}

pub struct FileHandler {
    pub conf: TreeConf,
    data_path: PathBuf,
    inner: Mutex<Inner>,
}

impl FileHandler {
    pub fn open(options: &EngineOptions) -> DbResult<Self> {
        let data_path = options.data_path();
        let wal_path = options.wal_path();
        let conf = TreeConf {
            order: options.order,
            page_size: options.page_size,
            key_size: options.key_size,
            value_size: options.value_size,
        };

        let data_file =
            OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&data_path)?;
        let file_len = data_file.metadata()?.len();
        let last_page = (file_len / conf.page_size as u64) as u32;

        let mut inner = Inner {
            freelist: BTreeSet::new(),
            last_page,
            cache: cache::build(options.cache_size),
            wal: Wal::open(&wal_path, conf.page_size)?,
            data_file,
        };
        inner.freelist = scan_freelist(&mut inner.data_file, conf.page_size, last_page)?;

        Ok(Self { conf, data_path, inner: Mutex::new(inner) })
    }

    pub fn get_node(&self, page: u32) -> DbResult<BNode> {
        let mut guard = self.inner.lock();
        if let Some(node) = guard.cache.get(page) {
            return Ok(node);
        }
        let bytes = guard.read_raw_page(page, self.conf.page_size)?;
        let node = {
            let mut io = IoCtx { inner: &mut *guard, page_size: self.conf.page_size };
            BNode::load(&bytes, self.conf.key_size, self.conf.value_size, &mut io)?
        };
        guard.cache.put(page, node.clone());
        Ok(node)
    }

    pub fn set_node(&self, page: u32, node: &BNode) -> DbResult<()> {
        let mut guard = self.inner.lock();
        let old_head = guard.read_raw_page(page, self.conf.page_size).ok();

        let bytes = {
            let mut io = IoCtx { inner: &mut *guard, page_size: self.conf.page_size };
            node.dump(self.conf.key_size, self.conf.value_size, &mut io)?
        };
        guard.wal.set_page(page, &bytes)?;

        if let Some(old_bytes) = old_head {
            let old_next = node::head_next_overflow(&old_bytes);
            if old_next != 0 {
                let mut io = IoCtx { inner: &mut *guard, page_size: self.conf.page_size };
                node::deprecate_overflow_chain(old_next, &mut io)?;
            }
        }
        guard.cache.put(page, node.clone());
        Ok(())
    }

    pub fn collect_deprecated_page(&self, page: u32) -> DbResult<()> {
        let mut guard = self.inner.lock();
        guard.deprecate_page(page, self.conf.page_size)
    }

    pub fn next_available_page(&self) -> DbResult<u32> {
        self.inner.lock().alloc_page()
    }

    /// Read page 0 (tree-config metadata) directly from the data file,
    /// bypassing cache and WAL. Returns `None` if the file predates a
    /// written metadata page.
    pub fn get_meta(&self) -> DbResult<Option<(u32, TreeConf)>> {
        let mut guard = self.inner.lock();
        if guard.data_file.metadata()?.len() < self.conf.page_size as u64 {
            return Ok(None);
        }
        let bytes = guard.read_data_page(META_PAGE_NUMBER, self.conf.page_size)?;
        let root_page = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let order = bytes[4] as usize;
        if order == 0 {
            return Ok(None);
        }
        let page_size = read_u24(&bytes[5..5 + PAGE_LENGTH_LIMIT]) as usize;
        let mut off = 5 + PAGE_LENGTH_LIMIT;
        let key_size = u16::from_be_bytes(bytes[off..off + 2].try_into().unwrap()) as usize;
        off += KEY_LENGTH_LIMIT;
        let value_size = u32::from_be_bytes(bytes[off..off + 4].try_into().unwrap()) as usize;
        Ok(Some((root_page, TreeConf { order, page_size, key_size, value_size })))
    }

    /// Write page 0 directly to the data file, with fsync, bypassing the
    /// WAL (`spec.md` §4.5: "read/write page 0 with fsync").
    pub fn set_meta(&self, root_page: u32, conf: &TreeConf) -> DbResult<()> {
        if conf.order > u8::MAX as usize {
            return Err(DbError::CorruptData("order exceeds metadata field width".into()));
        }
        let mut bytes = Vec::with_capacity(self.conf.page_size);
        bytes.extend_from_slice(&root_page.to_be_bytes());
        bytes.push(conf.order as u8);
        bytes.extend_from_slice(&write_u24(conf.page_size as u32));
        bytes.extend_from_slice(&(conf.key_size as u16).to_be_bytes());
        bytes.extend_from_slice(&(conf.value_size as u32).to_be_bytes());
        debug_assert_eq!(bytes.len(), META_HEADER_LEN);
        bytes.resize(self.conf.page_size, 0);

        let mut guard = self.inner.lock();
        guard.write_data_page(META_PAGE_NUMBER, &bytes)?;
        guard.data_file.sync_all()?;
        Ok(())
    }

    /// Persist the root node image and metadata, then commit — all
    /// under whatever writer transaction the caller already holds.
    pub fn ensure_root_block(&self, root_page: u32, node: &BNode) -> DbResult<()> {
        self.set_node(root_page, node)?;
        self.set_meta(root_page, &self.conf)?;
        self.commit()
    }

    pub fn commit(&self) -> DbResult<()> {
        self.inner.lock().wal.commit()
    }

    pub fn rollback(&self) -> DbResult<()> {
        let mut guard = self.inner.lock();
        guard.wal.rollback()?;
        guard.cache.clear();
        Ok(())
    }

    pub fn perform_checkpoint(&self, reopen_wal: bool) -> DbResult<()> {
        let mut guard = self.inner.lock();
        let drained = guard.wal.checkpoint()?;
        for (page, bytes) in drained {
            guard.write_data_page(page, &bytes)?;
        }
        guard.data_file.sync_all()?;
        if reopen_wal {
            guard.wal.reopen()?;
        }
        Ok(())
    }

    /// Dump every cached node through the WAL, commit, checkpoint, and
    /// reopen the WAL. Snapshots the cache before clearing it, per the
    /// cache-mutation-during-iteration hazard `spec.md` §9 flags.
    pub fn flush(&self) -> DbResult<()> {
        let mut guard = self.inner.lock();
        let snapshot = guard.cache.drain();
        for (page, node) in &snapshot {
            let bytes = {
                let mut io = IoCtx { inner: &mut *guard, page_size: self.conf.page_size };
                node.dump(self.conf.key_size, self.conf.value_size, &mut io)?
            };
            guard.wal.set_page(*page, &bytes)?;
        }
        guard.wal.commit()?;
        let drained = guard.wal.checkpoint()?;
        for (page, bytes) in drained {
            guard.write_data_page(page, &bytes)?;
        }
        guard.data_file.sync_all()?;
        guard.wal.reopen()?;
        Ok(())
    }

    pub fn close(&self) -> DbResult<()> {
        self.perform_checkpoint(false)?;
        let mut guard = self.inner.lock();
        guard.cache.clear();
        guard.data_file.sync_all()?;
        Ok(())
    }

    #[must_use]
    pub fn data_path(&self) -> &std::path::Path {
        &self.data_path
    }
}

/// Freelist loading on open: a single linear scan over page-type bytes
/// at page boundaries (`spec.md` §4.5).
fn scan_freelist(file: &mut File, page_size: usize, last_page: u32) -> DbResult<BTreeSet<u32>> {
    let mut freelist = BTreeSet::new();
    let mut type_byte = [0u8; 1];
    for page in 1..=last_page {
        file.seek(SeekFrom::Start(u64::from(page) * page_size as u64))?;
        if file.read_exact(&mut type_byte).is_err() {
            break;
        }
        if type_byte[0] == PAGE_TYPE_DEPRECATED {
            freelist.insert(page);
        }
    }
    Ok(freelist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::KeyValPair;
    use crate::codec::Value;
    use tempfile::tempdir;

    fn opts(dir: &std::path::Path) -> EngineOptions {
        EngineOptions::new(dir.join("db")).page_size(128).key_size(16).value_size(32).order(4)
    }

    #[test]
    fn set_then_get_node_round_trips_through_cache() {
        let dir = tempdir().unwrap();
        let handler = FileHandler::open(&opts(dir.path())).unwrap();
        let node = BNode {
            pairs: vec![KeyValPair { key: Value::Str("a".into()), value: Value::Int(1) }],
            children: vec![],
        };
        let page = handler.next_available_page().unwrap();
        handler.set_node(page, &node).unwrap();
        let loaded = handler.get_node(page).unwrap();
        assert_eq!(loaded, node);
    }

    #[test]
    fn meta_round_trips() {
        let dir = tempdir().unwrap();
        let handler = FileHandler::open(&opts(dir.path())).unwrap();
        handler.set_meta(7, &handler.conf).unwrap();
        let (root, conf) = handler.get_meta().unwrap().unwrap();
        assert_eq!(root, 7);
        assert_eq!(conf, handler.conf);
    }

    #[test]
    fn checkpoint_removes_wal_and_persists_to_data_file() {
        let dir = tempdir().unwrap();
        let handler = FileHandler::open(&opts(dir.path())).unwrap();
        let node = BNode { pairs: vec![], children: vec![] };
        let page = handler.next_available_page().unwrap();
        handler.set_node(page, &node).unwrap();
        handler.commit().unwrap();
        handler.perform_checkpoint(true).unwrap();
        assert!(!handler.opts_wal_path_exists(dir.path()));
    }

    impl FileHandler {
        fn opts_wal_path_exists(&self, dir: &std::path::Path) -> bool {
            dir.join("db.cdb.wal").exists()
        }
    }
}
