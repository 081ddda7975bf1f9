//! Hot-instance cache consulted before the shard free-lists
//!
//! Entries own their instances outright: a hit pops the entry, so a cached
//! instance can never also be handed to a second caller. Insertion happens on
//! release; overflow demotes the least-recently-stored instance instead of
//! dropping it, and the registry routes the demoted instance back to the
//! free-lists.

use std::collections::VecDeque;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Bounded per-pool stack of recently released instances. Rows keep
/// insertion order, so the back is the hottest entry and the front is the
/// least recently stored.
#[derive(Debug, Default)]
pub(crate) struct CacheLayer<T> {
    rows: DashMap<String, Mutex<VecDeque<T>>>,
}

impl<T> CacheLayer<T> {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    /// Pops the most recently stored instance for `pool`, if any.
    pub fn take(&self, pool: &str) -> Option<T> {
        let row = self.rows.get(pool)?;
        let mut entries = row.lock();
        entries.pop_back()
    }

    /// Stores `value`; when the row already holds `max` entries the least
    /// recently stored instance is returned for demotion.
    pub fn insert(&self, pool: &str, value: T, max: usize) -> Option<T> {
        let row = self
            .rows
            .entry(pool.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut entries = row.lock();
        entries.push_back(value);
        if entries.len() > max {
            entries.pop_front()
        } else {
            None
        }
    }

    /// Drains every cached instance for `pool`.
    pub fn purge(&self, pool: &str) -> Vec<T> {
        match self.rows.get(pool) {
            Some(row) => row.lock().drain(..).collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self, pool: &str) -> usize {
        self.rows.get(pool).map(|row| row.lock().len()).unwrap_or(0)
    }

    pub fn remove_pool(&self, pool: &str) {
        self.rows.remove(pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_pops_the_hottest_entry() {
        let cache: CacheLayer<u32> = CacheLayer::new();
        assert!(cache.insert("p", 1, 4).is_none());
        assert!(cache.insert("p", 2, 4).is_none());
        assert_eq!(cache.take("p"), Some(2));
        assert_eq!(cache.take("p"), Some(1));
        assert_eq!(cache.take("p"), None);
    }

    #[test]
    fn overflow_demotes_the_least_recently_stored() {
        let cache: CacheLayer<u32> = CacheLayer::new();
        assert!(cache.insert("p", 1, 2).is_none());
        assert!(cache.insert("p", 2, 2).is_none());
        assert_eq!(cache.insert("p", 3, 2), Some(1));
        assert_eq!(cache.len("p"), 2);
    }

    #[test]
    fn rows_are_isolated_per_pool() {
        let cache: CacheLayer<u32> = CacheLayer::new();
        cache.insert("a", 1, 4);
        cache.insert("b", 2, 4);
        assert_eq!(cache.take("b"), Some(2));
        assert_eq!(cache.take("b"), None);
        assert_eq!(cache.len("a"), 1);
    }

    #[test]
    fn purge_drains_everything() {
        let cache: CacheLayer<u32> = CacheLayer::new();
        cache.insert("p", 1, 4);
        cache.insert("p", 2, 4);
        let mut drained = cache.purge("p");
        drained.sort_unstable();
        assert_eq!(drained, vec![1, 2]);
        assert_eq!(cache.len("p"), 0);
    }
}
