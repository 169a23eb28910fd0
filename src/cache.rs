//! Page cache (C3): a bounded LRU mapping page number → node, plus a
//! null-cache variant for benchmarking / cache-less mode. No dirty bit —
//! dirtiness is implicit in whether the page has been handed to the WAL
//! since the last commit (tracked by the file handler, not the cache).
//!
//! Grounded in the teacher's `cache/core.rs` use of the `lru` crate under
//! a `parking_lot::RwLock`, simplified: no TTL, no eviction-mode enum, no
//! metrics, no background purge thread — none of those are part of the
//! page-cache contract this spec defines.

use crate::config::CacheSize;
use crate::node::BNode;
use lru::LruCache;
use std::num::NonZeroUsize;

/// Bounded or null mapping from page number to node, with LRU eviction.
pub trait PageCache: Send {
    fn get(&mut self, page: u32) -> Option<BNode>;
    fn put(&mut self, page: u32, node: BNode);
    fn remove(&mut self, page: u32);
    fn clear(&mut self);
    /// Snapshot every cached entry and clear the cache, in that order —
    /// the ordering `spec.md` §9 requires for `flush` to avoid mutating
    /// the cache while iterating it.
    fn drain(&mut self) -> Vec<(u32, BNode)>;
}

pub struct LruPageCache {
    inner: LruCache<u32, BNode>,
}

impl LruPageCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { inner: LruCache::new(cap) }
    }

    #[must_use]
    pub fn unbounded() -> Self {
        Self { inner: LruCache::unbounded() }
    }
}

impl PageCache for LruPageCache {
    fn get(&mut self, page: u32) -> Option<BNode> {
        self.inner.get(&page).cloned()
    }

    fn put(&mut self, page: u32, node: BNode) {
        self.inner.put(page, node);
    }

    fn remove(&mut self, page: u32) {
        self.inner.pop(&page);
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    fn drain(&mut self) -> Vec<(u32, BNode)> {
        let snapshot: Vec<(u32, BNode)> =
            self.inner.iter().map(|(&page, node)| (page, node.clone())).collect();
        self.inner.clear();
        snapshot
    }
}

#[derive(Default)]
pub struct NullPageCache;

impl PageCache for NullPageCache {
    fn get(&mut self, _page: u32) -> Option<BNode> {
        None
    }
    fn put(&mut self, _page: u32, _node: BNode) {}
    fn remove(&mut self, _page: u32) {}
    fn clear(&mut self) {}
    fn drain(&mut self) -> Vec<(u32, BNode)> {
        Vec::new()
    }
}

/// Build the cache variant `spec.md` §6's `cache_size` option selects.
#[must_use]
pub fn build(cache_size: CacheSize) -> Box<dyn PageCache> {
    match cache_size {
        CacheSize::Null => Box::new(NullPageCache),
        CacheSize::Unbounded => Box::new(LruPageCache::unbounded()),
        CacheSize::Bounded(n) => Box::new(LruPageCache::new(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> BNode {
        BNode::leaf()
    }

    #[test]
    fn lru_evicts_oldest_on_overflow() {
        let mut cache = LruPageCache::new(2);
        cache.put(1, node());
        cache.put(2, node());
        cache.put(3, node());
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn null_cache_never_hits() {
        let mut cache = NullPageCache;
        cache.put(1, node());
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn drain_snapshots_then_clears() {
        let mut cache = LruPageCache::new(8);
        cache.put(1, node());
        cache.put(2, node());
        let drained = cache.drain();
        assert_eq!(drained.len(), 2);
        assert!(cache.get(1).is_none());
    }
}
