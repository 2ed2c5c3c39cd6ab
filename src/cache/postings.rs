//! Cached clustered postings: term to cluster sequence for one
//! (segment, field).
//!
//! Values publish atomically under the map's write lock; readers see the
//! whole `PostingClusters` or nothing. Duplicate terms keep the first
//! insertion. Built during flush or merge, read-only afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::budget::CircuitBreaker;
use crate::cache::lru::LruTracker;
use crate::cache::{CacheKey, TermKey};
use crate::error::Result;
use crate::index::{ClusteredPostingReader, ClusteredPostingWriter};
use crate::posting::{DocumentCluster, PostingClusters, SharedPostingClusters, Term};

/// Clustered-posting store for one (segment, field), owned by the cache
/// manager.
pub struct ClusteredPostingCacheItem {
    key: CacheKey,
    postings: RwLock<HashMap<Term, SharedPostingClusters>>,
    used_bytes: AtomicU64,
    breaker: Arc<CircuitBreaker>,
    term_lru: Arc<LruTracker<TermKey>>,
}

impl ClusteredPostingCacheItem {
    pub(crate) fn new(
        key: CacheKey,
        breaker: Arc<CircuitBreaker>,
        term_lru: Arc<LruTracker<TermKey>>,
    ) -> Self {
        let item = Self {
            key,
            postings: RwLock::new(HashMap::new()),
            used_bytes: AtomicU64::new(0),
            breaker,
            term_lru,
        };
        let base = item.base_bytes();
        item.used_bytes.store(base, Ordering::Release);
        item.breaker.add_without_breaking(base);
        item
    }

    /// Fixed overhead of the empty map, accounted at creation.
    pub fn base_bytes(&self) -> u64 {
        std::mem::size_of::<Self>() as u64
    }

    pub fn ram_bytes_used(&self) -> u64 {
        self.used_bytes.load(Ordering::Acquire)
    }

    fn entry_bytes(term: &[u8], clusters: &PostingClusters) -> u64 {
        clusters.ram_bytes_used()
            + term.len() as u64
            + (std::mem::size_of::<Term>() + std::mem::size_of::<SharedPostingClusters>()) as u64
    }

    /// Drop one term's clusters, returning the bytes freed.
    pub(crate) fn erase(&self, term: &[u8]) -> u64 {
        let removed = self.postings.write().remove(term);
        match removed {
            Some(clusters) => {
                let bytes = Self::entry_bytes(term, &clusters);
                self.used_bytes.fetch_sub(bytes, Ordering::AcqRel);
                self.breaker.release(bytes);
                self.term_lru.remove(&TermKey {
                    cache_key: self.key,
                    term: term.to_vec(),
                });
                bytes
            }
            None => 0,
        }
    }

    /// Release every byte this item accounts, including the base
    /// overhead. Called once when the owning segment is deleted.
    pub(crate) fn release_all(&self) -> u64 {
        let mut map = self.postings.write();
        let mut freed = 0u64;
        for (term, clusters) in map.drain() {
            freed += Self::entry_bytes(&term, &clusters);
        }
        freed += self.base_bytes();
        self.used_bytes.store(0, Ordering::Release);
        self.breaker.release(freed);
        freed
    }
}

impl ClusteredPostingReader for ClusteredPostingCacheItem {
    fn read(&self, term: &[u8]) -> Result<Option<SharedPostingClusters>> {
        let clusters = self.postings.read().get(term).cloned();
        if clusters.is_some() {
            self.term_lru.touch(TermKey {
                cache_key: self.key,
                term: term.to_vec(),
            });
        }
        Ok(clusters)
    }

    fn terms(&self) -> Result<Vec<Term>> {
        Ok(self.postings.read().keys().cloned().collect())
    }

    fn term_count(&self) -> usize {
        self.postings.read().len()
    }
}

impl ClusteredPostingWriter for ClusteredPostingCacheItem {
    fn insert(&self, term: &[u8], clusters: Vec<DocumentCluster>) -> Result<()> {
        if clusters.is_empty() {
            return Ok(());
        }
        let value: SharedPostingClusters = Arc::new(PostingClusters::new(clusters));
        let bytes = Self::entry_bytes(term, &value);
        self.breaker.reserve(bytes)?;

        let mut map = self.postings.write();
        if map.contains_key(term) {
            drop(map);
            self.breaker.release(bytes);
            return Ok(());
        }
        map.insert(term.to_vec(), value);
        drop(map);
        self.used_bytes.fetch_add(bytes, Ordering::AcqRel);
        self.term_lru.touch(TermKey {
            cache_key: self.key,
            term: term.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posting::DocWeight;

    fn item(limit: u64) -> ClusteredPostingCacheItem {
        ClusteredPostingCacheItem::new(
            CacheKey::new(1, 0),
            Arc::new(CircuitBreaker::new(limit)),
            Arc::new(LruTracker::new()),
        )
    }

    fn one_cluster() -> Vec<DocumentCluster> {
        vec![DocumentCluster::new(
            None,
            vec![DocWeight::new(1, 4), DocWeight::new(2, 8)],
            true,
        )]
    }

    #[test]
    fn duplicate_term_keeps_first_insertion() {
        let store = item(u64::MAX);
        store.insert(b"42", one_cluster()).unwrap();
        let first = store.read(b"42").unwrap().unwrap();
        store
            .insert(b"42", vec![DocumentCluster::new(None, vec![], true)])
            .unwrap();
        let second = store.read(b"42").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn empty_clusters_are_rejected() {
        let store = item(u64::MAX);
        store.insert(b"42", vec![]).unwrap();
        assert_eq!(store.term_count(), 0);
    }

    #[test]
    fn budget_refusal_drops_insert() {
        let store = item(0);
        assert!(store.insert(b"42", one_cluster()).is_err());
        assert!(store.read(b"42").unwrap().is_none());
    }

    #[test]
    fn erase_frees_exact_bytes() {
        let store = item(u64::MAX);
        let before = store.ram_bytes_used();
        store.insert(b"42", one_cluster()).unwrap();
        let grown = store.ram_bytes_used() - before;
        assert!(grown > 0);
        assert_eq!(store.erase(b"42"), grown);
        assert_eq!(store.ram_bytes_used(), before);
        assert_eq!(store.erase(b"42"), 0);
    }
}
