//! Access-recency tracking for cache eviction.
//!
//! Keys are stamped with a monotonic counter on every access; the least
//! recently used key is the one with the smallest live stamp. The whole
//! structure sits behind one mutex: recency updates are tiny and the
//! eviction walk already serializes on the breaker's eviction lock.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use parking_lot::Mutex;

struct LruState<K> {
    stamps: HashMap<K, u64>,
    order: BTreeMap<u64, K>,
    next_stamp: u64,
}

/// Recency tracker with O(log n) touch and pop-least-recent.
pub struct LruTracker<K: Eq + Hash + Clone> {
    state: Mutex<LruState<K>>,
}

impl<K: Eq + Hash + Clone> Default for LruTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> LruTracker<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LruState {
                stamps: HashMap::new(),
                order: BTreeMap::new(),
                next_stamp: 0,
            }),
        }
    }

    /// Record an access, moving the key to most-recently-used.
    pub fn touch(&self, key: K) {
        let mut state = self.state.lock();
        let stamp = state.next_stamp;
        state.next_stamp += 1;
        if let Some(old) = state.stamps.insert(key.clone(), stamp) {
            state.order.remove(&old);
        }
        state.order.insert(stamp, key);
    }

    /// Forget a key (entry was erased through another path).
    pub fn remove(&self, key: &K) {
        let mut state = self.state.lock();
        if let Some(stamp) = state.stamps.remove(key) {
            state.order.remove(&stamp);
        }
    }

    /// Remove and return the least recently used key.
    pub fn pop_least_recent(&self) -> Option<K> {
        let mut state = self.state.lock();
        let (&stamp, _) = state.order.iter().next()?;
        let key = state.order.remove(&stamp)?;
        state.stamps.remove(&key);
        Some(key)
    }

    /// Drop every key matching the predicate (segment removal).
    pub fn remove_matching(&self, mut predicate: impl FnMut(&K) -> bool) {
        let mut state = self.state.lock();
        let doomed: Vec<(u64, K)> = state
            .order
            .iter()
            .filter(|(_, key)| predicate(key))
            .map(|(&stamp, key)| (stamp, key.clone()))
            .collect();
        for (stamp, key) in doomed {
            state.order.remove(&stamp);
            state.stamps.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_returns_least_recent_first() {
        let lru = LruTracker::new();
        lru.touch("a");
        lru.touch("b");
        lru.touch("c");
        lru.touch("a"); // refresh: b is now oldest
        assert_eq!(lru.pop_least_recent(), Some("b"));
        assert_eq!(lru.pop_least_recent(), Some("c"));
        assert_eq!(lru.pop_least_recent(), Some("a"));
        assert_eq!(lru.pop_least_recent(), None);
    }

    #[test]
    fn remove_matching_purges_keys() {
        let lru = LruTracker::new();
        for i in 0..10 {
            lru.touch(i);
        }
        lru.remove_matching(|&i| i % 2 == 0);
        assert_eq!(lru.len(), 5);
        assert_eq!(lru.pop_least_recent(), Some(1));
    }
}
