//! B-tree engine (C6): descent, insertion, deletion, and rebalancing
//! over pages mediated by the file handler (C5), under the reader/writer
//! discipline of C7.
//!
//! Grounded in `cannondb/btree.py`'s `BTree`/`BNode.insert`/`.remove`/
//! `.shrink`/`.grow`. Nodes here are addressed by page number rather than
//! held as in-memory object graphs, so every descent re-fetches through
//! [`FileHandler::get_node`] (cache-backed) instead of following Python
//! object references, and every structural edit is explicitly persisted
//! through [`FileHandler::set_node`].
//!
//! `shrink` (relieve insert-overflow) and `grow` (relieve remove-underflow)
//! both resolve to the same pair of lateral-borrow primitives —
//! [`node::rotate_from_left`] / [`node::rotate_from_right`] — in opposite
//! roles: `shrink` treats the overflowing node as the donor, `grow` treats
//! the underflowing node as the recipient. Working through the four cases
//! in `btree.py`'s `lateral()` against those two functions confirmed they
//! are the same primitive, so no separate "lend to a full sibling" helper
//! was needed in `node.rs`.

use crate::codec::Value;
use crate::config::EngineOptions;
use crate::errors::{DbError, DbResult};
use crate::handler::FileHandler;
use crate::node::{self, BNode, KeyValPair};
use crate::txn::{ReadTxn, WriteTxn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct BTreeEngine {
    handler: Arc<FileHandler>,
    lock: Arc<RwLock<()>>,
    root_page: Mutex<u32>,
    auto_commit: AtomicBool,
}

impl BTreeEngine {
    pub fn open(options: &EngineOptions) -> DbResult<Self> {
        let handler = Arc::new(FileHandler::open(options)?);
        let root_page = match handler.get_meta()? {
            Some((root, stored_conf)) => {
                if stored_conf != handler.conf {
                    return Err(DbError::CorruptData(format!(
                        "database at {} was created with a different page/key/value size or order \
                         than requested ({stored_conf:?} vs {:?})",
                        handler.data_path().display(),
                        handler.conf
                    )));
                }
                root
            }
            None => {
                let page = handler.next_available_page()?;
                handler.ensure_root_block(page, &BNode::leaf())?;
                page
            }
        };
        Ok(Self {
            handler,
            lock: Arc::new(RwLock::new(())),
            root_page: Mutex::new(root_page),
            auto_commit: AtomicBool::new(options.auto_commit),
        })
    }

    #[must_use]
    pub fn set_auto_commit(&self, enabled: bool) {
        self.auto_commit.store(enabled, Ordering::Relaxed);
    }

    fn min_elements(&self) -> usize {
        self.handler.conf.order.div_ceil(2)
    }

    fn write_txn(&self) -> WriteTxn {
        WriteTxn::begin(self.handler.clone(), self.lock.clone(), self.auto_commit.load(Ordering::Relaxed))
    }

    fn read_txn(&self) -> ReadTxn {
        ReadTxn::begin(self.lock.clone())
    }

    /// Path from the root to the node containing `key` — present or not.
    /// The last entry is always the node/index where `key` would live.
    fn path_to(&self, key: &Value) -> DbResult<Vec<(u32, usize)>> {
        let mut ancestry = Vec::new();
        let mut page = *self.root_page.lock();
        loop {
            let node = self.handler.get_node(page)?;
            let index = node.pairs.partition_point(|p| &p.key < key);
            if node.is_leaf() {
                ancestry.push((page, index));
                return Ok(ancestry);
            }
            if index < node.pairs.len() && node.pairs[index].key == *key {
                ancestry.push((page, index));
                return Ok(ancestry);
            }
            let child = node.children[index];
            ancestry.push((page, index));
            page = child;
        }
    }

    pub fn get(&self, key: &Value) -> DbResult<Option<Value>> {
        let _txn = self.read_txn();
        self.get_locked(key)
    }

    fn get_locked(&self, key: &Value) -> DbResult<Option<Value>> {
        let ancestry = self.path_to(key)?;
        let &(page, index) = ancestry.last().expect("path_to always returns at least one entry");
        let node = self.handler.get_node(page)?;
        if index < node.pairs.len() && node.pairs[index].key == *key {
            Ok(Some(node.pairs[index].value.clone()))
        } else {
            Ok(None)
        }
    }

    #[must_use]
    pub fn contains(&self, key: &Value) -> bool {
        self.get(key).ok().flatten().is_some()
    }

    pub fn batch_get(&self, keys: &[Value]) -> DbResult<Vec<Option<Value>>> {
        let _txn = self.read_txn();
        keys.iter().map(|k| self.get_locked(k)).collect()
    }

    /// In-order traversal under a single reader transaction, materialized
    /// into a vector — the engine holds no long-lived cursor across calls.
    pub fn iter(&self) -> DbResult<Vec<(Value, Value)>> {
        let _txn = self.read_txn();
        let mut out = Vec::new();
        let root = *self.root_page.lock();
        self.collect_inorder(root, &mut out)?;
        Ok(out)
    }

    fn collect_inorder(&self, page: u32, out: &mut Vec<(Value, Value)>) -> DbResult<()> {
        let node = self.handler.get_node(page)?;
        if node.is_leaf() {
            out.extend(node.pairs.iter().map(|p| (p.key.clone(), p.value.clone())));
        } else {
            for (i, pair) in node.pairs.iter().enumerate() {
                self.collect_inorder(node.children[i], out)?;
                out.push((pair.key.clone(), pair.value.clone()));
            }
            self.collect_inorder(*node.children.last().expect("branch has one more child than pairs"), out)?;
        }
        Ok(())
    }

    pub fn insert(&self, key: Value, value: Value, override_existing: bool) -> DbResult<()> {
        let mut txn = self.write_txn();
        let result = self.insert_locked(&key, value, override_existing);
        if result.is_err() {
            txn.mark_failed();
        }
        result
    }

    pub fn batch_insert(&self, mut pairs: Vec<(Value, Value)>, override_existing: bool) -> DbResult<()> {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let mut txn = self.write_txn();
        let mut result = Ok(());
        for (key, value) in pairs {
            if let Err(e) = self.insert_locked(&key, value, override_existing) {
                result = Err(e);
                break;
            }
        }
        if result.is_err() {
            txn.mark_failed();
        }
        result
    }

    fn insert_locked(&self, key: &Value, value: Value, override_existing: bool) -> DbResult<()> {
        let mut ancestry = self.path_to(key)?;
        let (page, index) = ancestry.pop().expect("path_to always returns at least one entry");
        let mut node = self.handler.get_node(page)?;

        if index < node.pairs.len() && node.pairs[index].key == *key {
            if !override_existing {
                return Err(DbError::DuplicateKey(format!("{key:?}")));
            }
            node.pairs[index].value = value;
            self.handler.set_node(page, &node)?;
            return Ok(());
        }

        node.pairs.insert(index, KeyValPair { key: key.clone(), value });
        self.handler.set_node(page, &node)?;
        if node.pairs.len() > self.handler.conf.order {
            self.shrink(page, node, ancestry)?;
        }
        Ok(())
    }

    /// Relieve an insert-overflow (`node.pairs.len() > order`) at `page`,
    /// propagating splits up to the root if necessary.
    fn shrink(&self, page: u32, mut node: BNode, mut ancestry: Vec<(u32, usize)>) -> DbResult<()> {
        let Some((parent_page, parent_index)) = ancestry.pop() else {
            let (mid_pair, sibling) = node.split();
            let sibling_page = self.handler.next_available_page()?;
            let new_root_page = self.handler.next_available_page()?;
            self.handler.set_node(page, &node)?;
            self.handler.set_node(sibling_page, &sibling)?;
            let new_root = BNode { pairs: vec![mid_pair], children: vec![page, sibling_page] };
            self.handler.set_node(new_root_page, &new_root)?;
            *self.root_page.lock() = new_root_page;
            self.handler.set_meta(new_root_page, &self.handler.conf)?;
            return Ok(());
        };

        let mut parent = self.handler.get_node(parent_page)?;
        let order = self.handler.conf.order;

        if parent_index > 0 {
            let left_page = parent.children[parent_index - 1];
            let mut left = self.handler.get_node(left_page)?;
            if left.pairs.len() < order {
                let old_sep = parent.pairs[parent_index - 1].clone();
                let new_sep = node::rotate_from_right(&mut left, &mut node, old_sep);
                parent.pairs[parent_index - 1] = new_sep;
                self.handler.set_node(left_page, &left)?;
                self.handler.set_node(page, &node)?;
                self.handler.set_node(parent_page, &parent)?;
                return Ok(());
            }
        }
        if parent_index + 1 < parent.children.len() {
            let right_page = parent.children[parent_index + 1];
            let mut right = self.handler.get_node(right_page)?;
            if right.pairs.len() < order {
                let old_sep = parent.pairs[parent_index].clone();
                let new_sep = node::rotate_from_left(&mut right, &mut node, old_sep);
                parent.pairs[parent_index] = new_sep;
                self.handler.set_node(right_page, &right)?;
                self.handler.set_node(page, &node)?;
                self.handler.set_node(parent_page, &parent)?;
                return Ok(());
            }
        }

        let (mid_pair, sibling) = node.split();
        let sibling_page = self.handler.next_available_page()?;
        self.handler.set_node(page, &node)?;
        self.handler.set_node(sibling_page, &sibling)?;
        parent.pairs.insert(parent_index, mid_pair);
        parent.children.insert(parent_index + 1, sibling_page);
        self.handler.set_node(parent_page, &parent)?;
        if parent.pairs.len() > order {
            self.shrink(parent_page, parent, ancestry)?;
        }
        Ok(())
    }

    pub fn remove(&self, key: &Value) -> DbResult<()> {
        let mut txn = self.write_txn();
        let result = self.remove_locked(key);
        if result.is_err() {
            txn.mark_failed();
        }
        result
    }

    fn remove_locked(&self, key: &Value) -> DbResult<()> {
        let mut ancestry = self.path_to(key)?;
        let &(page, index) = ancestry.last().expect("path_to always returns at least one entry");
        let node = self.handler.get_node(page)?;
        if !(index < node.pairs.len() && node.pairs[index].key == *key) {
            return Err(DbError::KeyNotFound(format!("{key:?}")));
        }
        ancestry.pop();
        self.remove_at(page, node, index, ancestry)
    }

    /// Remove the pair at `index` within `node` (page `page`). For a
    /// branch, promotes the in-order successor (or, failing that, the
    /// predecessor) up into the slot and recurses the actual deletion
    /// down to a leaf.
    fn remove_at(&self, page: u32, mut node: BNode, index: usize, mut ancestry: Vec<(u32, usize)>) -> DbResult<()> {
        if !node.is_leaf() {
            let min_elements = self.min_elements();

            let mut additional = vec![(page, index + 1)];
            let mut desc_page = node.children[index + 1];
            let mut desc = self.handler.get_node(desc_page)?;
            while !desc.is_leaf() {
                additional.push((desc_page, 0));
                desc_page = desc.children[0];
                desc = self.handler.get_node(desc_page)?;
            }
            if desc.pairs.len() > min_elements {
                ancestry.extend(additional);
                node.pairs[index] = desc.pairs[0].clone();
                self.handler.set_node(page, &node)?;
                return self.remove_at(desc_page, desc, 0, ancestry);
            }

            let mut additional = vec![(page, index)];
            let mut desc_page = node.children[index];
            let mut desc = self.handler.get_node(desc_page)?;
            while !desc.is_leaf() {
                let last_child = desc.children.len() - 1;
                additional.push((desc_page, last_child));
                desc_page = desc.children[last_child];
                desc = self.handler.get_node(desc_page)?;
            }
            ancestry.extend(additional);
            let last_pair = desc.pairs.len() - 1;
            node.pairs[index] = desc.pairs[last_pair].clone();
            self.handler.set_node(page, &node)?;
            self.remove_at(desc_page, desc, last_pair, ancestry)
        } else {
            node.pairs.remove(index);
            self.handler.set_node(page, &node)?;
            if node.pairs.len() < self.min_elements() && !ancestry.is_empty() {
                self.grow(page, node, ancestry)?;
            }
            Ok(())
        }
    }

    /// Relieve a remove-underflow (`node.pairs.len() < min_elements`) at
    /// `page`. A no-op when `ancestry` is empty: the root is allowed to
    /// underflow.
    fn grow(&self, page: u32, mut node: BNode, mut ancestry: Vec<(u32, usize)>) -> DbResult<()> {
        let Some((parent_page, parent_index)) = ancestry.pop() else {
            return Ok(());
        };
        let mut parent = self.handler.get_node(parent_page)?;
        let min_elements = self.min_elements();

        if parent_index + 1 < parent.children.len() {
            let right_page = parent.children[parent_index + 1];
            let mut right = self.handler.get_node(right_page)?;
            if right.pairs.len() > min_elements {
                let old_sep = parent.pairs[parent_index].clone();
                let new_sep = node::rotate_from_right(&mut node, &mut right, old_sep);
                parent.pairs[parent_index] = new_sep;
                self.handler.set_node(page, &node)?;
                self.handler.set_node(right_page, &right)?;
                self.handler.set_node(parent_page, &parent)?;
                return Ok(());
            }
        }
        if parent_index > 0 {
            let left_page = parent.children[parent_index - 1];
            let mut left = self.handler.get_node(left_page)?;
            if left.pairs.len() > min_elements {
                let old_sep = parent.pairs[parent_index - 1].clone();
                let new_sep = node::rotate_from_left(&mut node, &mut left, old_sep);
                parent.pairs[parent_index - 1] = new_sep;
                self.handler.set_node(page, &node)?;
                self.handler.set_node(left_page, &left)?;
                self.handler.set_node(parent_page, &parent)?;
                return Ok(());
            }
        }

        if parent_index > 0 {
            let left_page = parent.children[parent_index - 1];
            let mut left = self.handler.get_node(left_page)?;
            let sep = parent.pairs.remove(parent_index - 1);
            left.merge_with_right(sep, node);
            parent.children.remove(parent_index);
            self.handler.set_node(left_page, &left)?;
            self.handler.collect_deprecated_page(page)?;
            self.handler.set_node(parent_page, &parent)?;
            self.finish_grow(parent_page, parent, ancestry)
        } else {
            let right_page = parent.children[parent_index + 1];
            let right = self.handler.get_node(right_page)?;
            let sep = parent.pairs.remove(parent_index);
            node.merge_with_right(sep, right);
            parent.children.remove(parent_index + 1);
            self.handler.set_node(page, &node)?;
            self.handler.collect_deprecated_page(right_page)?;
            self.handler.set_node(parent_page, &parent)?;
            self.finish_grow(parent_page, parent, ancestry)
        }
    }

    fn finish_grow(&self, parent_page: u32, parent: BNode, ancestry: Vec<(u32, usize)>) -> DbResult<()> {
        if parent.pairs.len() >= self.min_elements() {
            return Ok(());
        }
        if !ancestry.is_empty() {
            return self.grow(parent_page, parent, ancestry);
        }
        if parent.pairs.is_empty() {
            let new_root_page = parent.children[0];
            *self.root_page.lock() = new_root_page;
            self.handler.collect_deprecated_page(parent_page)?;
            self.handler.set_meta(new_root_page, &self.handler.conf)?;
        }
        Ok(())
    }

    pub fn commit(&self) -> DbResult<()> {
        let txn = self.write_txn();
        txn.commit()
    }

    pub fn rollback(&self) -> DbResult<()> {
        let txn = self.write_txn();
        txn.rollback()
    }

    pub fn checkpoint(&self) -> DbResult<()> {
        let _txn = self.write_txn();
        self.handler.perform_checkpoint(true)
    }

    pub fn flush(&self) -> DbResult<()> {
        let _txn = self.write_txn();
        self.handler.flush()
    }

    pub fn close(&self) -> DbResult<()> {
        let _txn = self.write_txn();
        self.handler.close()
    }
}
