//! Cached forward index: doc id to sparse vector for one (segment, field).
//!
//! Slot-based storage with first-write-wins semantics: a slot accepts a
//! vector only while empty, so concurrent populators never tear a read.
//! Every successful first write reserves the vector's byte size against
//! the circuit breaker; a refused reservation drops the write and leaves
//! the slot empty.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::budget::CircuitBreaker;
use crate::cache::lru::LruTracker;
use crate::cache::{CacheKey, DocKey};
use crate::error::Result;
use crate::index::{SparseVectorReader, SparseVectorWriter};
use crate::posting::DocId;
use crate::vector::SparseVector;

type Slot = RwLock<Option<Arc<SparseVector>>>;

/// Forward-index store for one (segment, field), owned by the cache
/// manager. Lifecycle: created when segment writes begin, frozen when the
/// segment seals, destroyed (with full byte release) when the segment is
/// deleted.
pub struct ForwardIndexCacheItem {
    key: CacheKey,
    slots: Vec<Slot>,
    used_bytes: AtomicU64,
    breaker: Arc<CircuitBreaker>,
    doc_lru: Arc<LruTracker<DocKey>>,
}

impl ForwardIndexCacheItem {
    pub(crate) fn new(
        key: CacheKey,
        doc_count: usize,
        breaker: Arc<CircuitBreaker>,
        doc_lru: Arc<LruTracker<DocKey>>,
    ) -> Self {
        let mut slots = Vec::with_capacity(doc_count);
        slots.resize_with(doc_count, || RwLock::new(None));
        let item = Self {
            key,
            slots,
            used_bytes: AtomicU64::new(0),
            breaker,
            doc_lru,
        };
        let base = item.base_bytes();
        item.used_bytes.store(base, Ordering::Release);
        item.breaker.add_without_breaking(base);
        item
    }

    /// Fixed overhead of the empty slot array, accounted at creation even
    /// when the budget refuses everything else.
    pub fn base_bytes(&self) -> u64 {
        (std::mem::size_of::<Self>() + self.slots.capacity() * std::mem::size_of::<Slot>()) as u64
    }

    /// Slot capacity (the segment's doc count).
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Best-effort estimate: slot array overhead plus stored vectors.
    pub fn ram_bytes_used(&self) -> u64 {
        self.used_bytes.load(Ordering::Acquire)
    }

    /// Drop one document's vector, returning the bytes freed.
    pub(crate) fn evict_doc(&self, doc_id: DocId) -> u64 {
        let Some(slot) = self.slots.get(doc_id as usize) else {
            return 0;
        };
        let taken = slot.write().take();
        match taken {
            Some(vector) => {
                let bytes = vector.ram_bytes_used();
                self.used_bytes.fetch_sub(bytes, Ordering::AcqRel);
                self.breaker.release(bytes);
                bytes
            }
            None => 0,
        }
    }

    /// Release every byte this item accounts, including the base
    /// overhead. Called once when the owning segment is deleted.
    pub(crate) fn release_all(&self) -> u64 {
        let mut freed = 0u64;
        for slot in &self.slots {
            if let Some(vector) = slot.write().take() {
                freed += vector.ram_bytes_used();
            }
        }
        freed += self.base_bytes();
        self.used_bytes.store(0, Ordering::Release);
        self.breaker.release(freed);
        freed
    }
}

impl SparseVectorReader for ForwardIndexCacheItem {
    fn read(&self, doc_id: DocId) -> Result<Option<Arc<SparseVector>>> {
        let Some(slot) = self.slots.get(doc_id as usize) else {
            return Ok(None);
        };
        let vector = slot.read().clone();
        if vector.is_some() {
            self.doc_lru.touch(DocKey {
                cache_key: self.key,
                doc_id,
            });
        }
        Ok(vector)
    }
}

impl SparseVectorWriter for ForwardIndexCacheItem {
    fn insert(&self, doc_id: DocId, vector: Arc<SparseVector>) -> Result<()> {
        let Some(slot) = self.slots.get(doc_id as usize) else {
            return Ok(());
        };
        if slot.read().is_some() {
            return Ok(());
        }
        let bytes = vector.ram_bytes_used();
        self.breaker.reserve(bytes)?;
        let mut guard = slot.write();
        if guard.is_none() {
            *guard = Some(vector);
            drop(guard);
            self.used_bytes.fetch_add(bytes, Ordering::AcqRel);
            self.doc_lru.touch(DocKey {
                cache_key: self.key,
                doc_id,
            });
        } else {
            // Lost the slot race; the reservation goes back.
            drop(guard);
            self.breaker.release(bytes);
        }
        Ok(())
    }
}
