//! Byte-budget circuit breaker for the in-memory caches.
//!
//! A single process-wide budget guards both sub-caches. `reserve` either
//! admits the requested bytes atomically or, after giving the registered
//! evictor one chance to free memory, refuses with a budget error.
//! Refused writes are dropped by callers (warm caches are best-effort).

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Result, SparseError};

/// Callback that frees up to the requested number of bytes and returns
/// how many were actually freed.
pub type Evictor = Box<dyn Fn(u64) -> u64 + Send + Sync>;

/// Atomic byte accounting against a fixed budget.
pub struct CircuitBreaker {
    limit: u64,
    used: AtomicU64,
    /// Serializes the eviction path; never held during reads.
    eviction_lock: Mutex<()>,
    evictor: RwLock<Option<Evictor>>,
}

impl CircuitBreaker {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
            eviction_lock: Mutex::new(()),
            evictor: RwLock::new(None),
        }
    }

    /// Install the eviction callback. Called once by the cache manager
    /// during init, before any store is published.
    pub fn set_evictor(&self, evictor: Evictor) {
        *self.evictor.write() = Some(evictor);
    }

    /// Configured byte budget.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Bytes currently accounted.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// Atomically admit `bytes` if the new total stays within budget.
    ///
    /// On refusal the evictor runs once under its own mutex and the
    /// reservation is retried; a second refusal surfaces as
    /// [`SparseError::Budget`].
    pub fn reserve(&self, bytes: u64) -> Result<()> {
        if self.try_reserve(bytes) {
            return Ok(());
        }

        {
            let _guard = self.eviction_lock.lock();
            if let Some(evictor) = self.evictor.read().as_ref() {
                let freed = evictor(bytes);
                debug!(requested = bytes, freed, "cache eviction triggered by reserve");
            }
        }

        if self.try_reserve(bytes) {
            return Ok(());
        }
        let used = self.used();
        Err(SparseError::Budget {
            requested: bytes,
            available: self.limit.saturating_sub(used),
        })
    }

    fn try_reserve(&self, bytes: u64) -> bool {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let Some(next) = current.checked_add(bytes) else {
                return false;
            };
            if next > self.limit {
                return false;
            }
            match self.used.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Account bytes unconditionally. Used for fixed per-store overhead
    /// (empty slot arrays, empty maps) so accounting covers the registry
    /// itself even when the budget is zero.
    pub fn add_without_breaking(&self, bytes: u64) {
        self.used.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Return bytes to the budget.
    pub fn release(&self, bytes: u64) {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(bytes);
            match self.used.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("limit", &self.limit)
            .field("used", &self.used())
            .finish_non_exhaustive()
    }
}
