//! Per-key lifecycle records consulted by eviction and metrics

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Lifecycle state of a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    /// Currently handed out to a caller.
    Active,
    /// Returned and waiting in the pool.
    Idle,
    /// Marked for removal; touches no longer update the record.
    Evicted,
    /// The pool that owns this record is being resized.
    Tuning,
}

/// Lifecycle record for one tracked key.
///
/// Records are created lazily on first touch and updated on every acquire
/// and release of the owning pool. Eviction policies read them to decide
/// staleness.
#[derive(Debug, Clone)]
pub struct ItemMetadata {
    pub pool_name: String,
    pub creation_time: Instant,
    pub last_used: Instant,
    /// Number of acquire/release touches.
    pub frequency: u64,
    /// Cumulative time the item spent handed out.
    pub usage_duration: Duration,
    /// Cumulative time the item spent waiting in the pool.
    pub idle_duration: Duration,
    pub status: ItemStatus,
    /// Hard deadline after which the evictor removes the record regardless
    /// of the configured policy.
    pub expiration_time: Option<Instant>,
    /// Usage budget; once `usage_duration` exceeds it the record is stale.
    pub max_usage_duration: Option<Duration>,
}

impl ItemMetadata {
    fn new(pool_name: &str) -> Self {
        let now = Instant::now();
        Self {
            pool_name: pool_name.to_string(),
            creation_time: now,
            last_used: now,
            frequency: 0,
            usage_duration: Duration::ZERO,
            idle_duration: Duration::ZERO,
            status: ItemStatus::Idle,
            expiration_time: None,
            max_usage_duration: None,
        }
    }

    /// Staleness intrinsic to the record itself, independent of any policy.
    pub fn expired_intrinsically(&self, now: Instant) -> bool {
        if self.expiration_time.is_some_and(|at| now >= at) {
            return true;
        }
        self.max_usage_duration
            .is_some_and(|budget| self.usage_duration > budget)
    }
}

/// Concurrent store of [`ItemMetadata`] keyed by item key.
#[derive(Debug, Default)]
pub(crate) struct MetadataStore {
    entries: DashMap<String, ItemMetadata>,
}

impl MetadataStore {
    /// Records a touch, creating the entry on first use. Evicted entries are
    /// never resurrected by a touch.
    pub fn touch(&self, pool: &str, key: &str, status: ItemStatus) {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| ItemMetadata::new(pool));
        if entry.status == ItemStatus::Evicted {
            return;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(entry.last_used);
        match (entry.status, status) {
            (ItemStatus::Active, ItemStatus::Idle) => entry.usage_duration += elapsed,
            (ItemStatus::Idle, ItemStatus::Active) => entry.idle_duration += elapsed,
            _ => {}
        }
        entry.last_used = now;
        entry.frequency += 1;
        entry.status = status;
    }

    /// Ensures a record exists for `key` without counting a touch.
    pub fn record(&self, pool: &str, key: &str) {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| ItemMetadata::new(pool));
    }

    /// Applies `f` to an existing entry. Returns false when the key is
    /// untracked.
    pub fn update(&self, key: &str, f: impl FnOnce(&mut ItemMetadata)) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                f(&mut entry);
                true
            }
            None => false,
        }
    }

    pub fn set_status(&self, key: &str, status: ItemStatus) {
        self.update(key, |entry| entry.status = status);
    }

    pub fn get(&self, key: &str) -> Option<ItemMetadata> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<ItemMetadata> {
        self.entries.remove(key).map(|(_, meta)| meta)
    }

    pub fn keys_for_pool(&self, pool: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.value().pool_name == pool)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn remove_pool(&self, pool: &str) {
        self.entries.retain(|_, meta| meta.pool_name != pool);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
