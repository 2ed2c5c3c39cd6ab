//! Cache manager: global registries of per-(segment, field) stores with
//! byte-budget accounting and LRU eviction.
//!
//! Two sub-caches share one circuit breaker: forward-index items (tracked
//! per doc id) and clustered-posting items (tracked per term). Eviction
//! runs single-threaded when a reservation is refused, walking
//! least-recently-used entries until enough bytes are free; it never
//! blocks concurrent reads. Deleting a segment purges both registries and
//! returns every accounted byte in one pass.

mod budget;
mod forward;
mod lru;
mod postings;

pub use budget::CircuitBreaker;
pub use forward::ForwardIndexCacheItem;
pub use postings::ClusteredPostingCacheItem;

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::debug;

use crate::posting::{DocId, Term};
use crate::settings::SparseSettings;
use lru::LruTracker;

/// Segment identifier assigned by the host.
pub type SegmentId = u64;
/// Field identifier within the host's schema.
pub type FieldId = u32;

/// Registry key: one sealed segment of one sparse field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub segment: SegmentId,
    pub field: FieldId,
}

impl CacheKey {
    pub fn new(segment: SegmentId, field: FieldId) -> Self {
        Self { segment, field }
    }
}

/// Eviction-granularity key for posting entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TermKey {
    pub cache_key: CacheKey,
    pub term: Term,
}

/// Eviction-granularity key for forward-index entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocKey {
    pub cache_key: CacheKey,
    pub doc_id: DocId,
}

/// Point-in-time memory accounting snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub limit_bytes: u64,
    pub used_bytes: u64,
    pub forward_bytes: u64,
    pub posting_bytes: u64,
}

struct CacheManagerInner {
    breaker: Arc<CircuitBreaker>,
    forward: DashMap<CacheKey, Arc<ForwardIndexCacheItem>>,
    postings: DashMap<CacheKey, Arc<ClusteredPostingCacheItem>>,
    term_lru: Arc<LruTracker<TermKey>>,
    doc_lru: Arc<LruTracker<DocKey>>,
    stats_enabled: bool,
}

impl CacheManagerInner {
    /// Free at least `needed` bytes in LRU order: posting terms first,
    /// then forward-index documents. Runs under the breaker's eviction
    /// mutex; reads proceed concurrently.
    fn evict(&self, needed: u64) -> u64 {
        let mut freed = 0u64;
        while freed < needed {
            if let Some(term_key) = self.term_lru.pop_least_recent() {
                if let Some(item) = self.postings.get(&term_key.cache_key) {
                    freed += item.erase(&term_key.term);
                }
                continue;
            }
            if let Some(doc_key) = self.doc_lru.pop_least_recent() {
                if let Some(item) = self.forward.get(&doc_key.cache_key) {
                    freed += item.evict_doc(doc_key.doc_id);
                }
                continue;
            }
            break; // both caches drained
        }
        freed
    }
}

/// Global cache registry. Cheap to clone; all clones share state.
///
/// Created explicitly at process init and torn down by dropping the last
/// clone; stores are never reachable before `new` returns.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<CacheManagerInner>,
}

impl CacheManager {
    /// Build a manager with an absolute byte budget.
    pub fn new(budget_bytes: u64) -> Self {
        Self::build(budget_bytes, false)
    }

    /// Build a manager from process settings, resolving a percentage
    /// limit against `heap_bytes`.
    pub fn with_settings(settings: &SparseSettings, heap_bytes: u64) -> Self {
        Self::build(
            settings.circuit_breaker_limit.resolve(heap_bytes),
            settings.stats_enabled,
        )
    }

    fn build(budget_bytes: u64, stats_enabled: bool) -> Self {
        let inner = Arc::new(CacheManagerInner {
            breaker: Arc::new(CircuitBreaker::new(budget_bytes)),
            forward: DashMap::new(),
            postings: DashMap::new(),
            term_lru: Arc::new(LruTracker::new()),
            doc_lru: Arc::new(LruTracker::new()),
            stats_enabled,
        });
        let weak: Weak<CacheManagerInner> = Arc::downgrade(&inner);
        inner.breaker.set_evictor(Box::new(move |needed| {
            weak.upgrade().map_or(0, |inner| inner.evict(needed))
        }));
        Self { inner }
    }

    /// The shared byte-budget breaker.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.breaker
    }

    pub fn stats_enabled(&self) -> bool {
        self.inner.stats_enabled
    }

    /// Forward-index store for `key`, creating an empty one (and
    /// registering its fixed overhead) on first use.
    pub fn forward_index(&self, key: CacheKey, doc_count: usize) -> Arc<ForwardIndexCacheItem> {
        let entry = self.inner.forward.entry(key).or_insert_with(|| {
            self.inner
                .breaker
                .add_without_breaking(std::mem::size_of::<CacheKey>() as u64);
            Arc::new(ForwardIndexCacheItem::new(
                key,
                doc_count,
                Arc::clone(&self.inner.breaker),
                Arc::clone(&self.inner.doc_lru),
            ))
        });
        Arc::clone(entry.value())
    }

    /// Forward-index store for `key` if one exists.
    pub fn get_forward_index(&self, key: &CacheKey) -> Option<Arc<ForwardIndexCacheItem>> {
        self.inner.forward.get(key).map(|item| Arc::clone(item.value()))
    }

    /// Clustered-posting store for `key`, creating an empty one (and
    /// registering its fixed overhead) on first use.
    pub fn clustered_postings(&self, key: CacheKey) -> Arc<ClusteredPostingCacheItem> {
        let entry = self.inner.postings.entry(key).or_insert_with(|| {
            self.inner
                .breaker
                .add_without_breaking(std::mem::size_of::<CacheKey>() as u64);
            Arc::new(ClusteredPostingCacheItem::new(
                key,
                Arc::clone(&self.inner.breaker),
                Arc::clone(&self.inner.term_lru),
            ))
        });
        Arc::clone(entry.value())
    }

    /// Clustered-posting store for `key` if one exists.
    pub fn get_clustered_postings(&self, key: &CacheKey) -> Option<Arc<ClusteredPostingCacheItem>> {
        self.inner
            .postings
            .get(key)
            .map(|item| Arc::clone(item.value()))
    }

    /// Purge every entry for a deleted segment and release its bytes.
    pub fn remove_segment(&self, key: &CacheKey) {
        let mut freed = 0u64;
        if let Some((_, item)) = self.inner.forward.remove(key) {
            freed += item.release_all();
            self.inner
                .breaker
                .release(std::mem::size_of::<CacheKey>() as u64);
        }
        if let Some((_, item)) = self.inner.postings.remove(key) {
            freed += item.release_all();
            self.inner
                .breaker
                .release(std::mem::size_of::<CacheKey>() as u64);
        }
        self.inner.term_lru.remove_matching(|k| k.cache_key == *key);
        self.inner.doc_lru.remove_matching(|k| k.cache_key == *key);
        debug!(segment = key.segment, field = key.field, freed, "segment removed from cache");
    }

    /// Current accounting snapshot.
    pub fn memory_stats(&self) -> MemoryStats {
        let forward_bytes = self
            .inner
            .forward
            .iter()
            .map(|entry| entry.value().ram_bytes_used())
            .sum();
        let posting_bytes = self
            .inner
            .postings
            .iter()
            .map(|entry| entry.value().ram_bytes_used())
            .sum();
        MemoryStats {
            limit_bytes: self.inner.breaker.limit(),
            used_bytes: self.inner.breaker.used(),
            forward_bytes,
            posting_bytes,
        }
    }
}
