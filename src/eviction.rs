//! Eviction policies for removing stale pool bookkeeping

use std::time::{Duration, Instant};

use crate::metadata::ItemMetadata;

/// Decides whether a tracked item is stale and should be removed.
///
/// The evictor consults the policy for every metadata entry belonging to a
/// pool; a `true` verdict removes the entry from the metadata store and the
/// cache, never from the shard free-lists.
pub trait EvictionPolicy: Send + Sync {
    fn should_evict(&self, key: &str, metadata: &ItemMetadata) -> bool;
}

/// Evicts items not used for longer than a fixed time-to-live.
#[derive(Debug, Clone)]
pub struct TtlEviction {
    pub ttl: Duration,
}

impl EvictionPolicy for TtlEviction {
    fn should_evict(&self, _key: &str, metadata: &ItemMetadata) -> bool {
        Instant::now().duration_since(metadata.last_used) > self.ttl
    }
}

/// Least-recently-used: evicts items idle for longer than `max_idle`.
#[derive(Debug, Clone)]
pub struct LruEviction {
    pub max_idle: Duration,
}

impl EvictionPolicy for LruEviction {
    fn should_evict(&self, _key: &str, metadata: &ItemMetadata) -> bool {
        Instant::now().duration_since(metadata.last_used) > self.max_idle
    }
}

/// Least-frequently-used: evicts items touched fewer than `min_frequency`
/// times.
#[derive(Debug, Clone)]
pub struct LfuEviction {
    pub min_frequency: u64,
}

impl EvictionPolicy for LfuEviction {
    fn should_evict(&self, _key: &str, metadata: &ItemMetadata) -> bool {
        metadata.frequency < self.min_frequency
    }
}

/// Combines the TTL, idle-time, and frequency checks; an item is evicted when
/// ANY configured sub-condition holds. Unset sub-conditions are skipped.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use shardpool::SmartEviction;
///
/// let policy = SmartEviction {
///     ttl: Some(Duration::from_secs(300)),
///     max_idle: Some(Duration::from_secs(60)),
///     min_frequency: None,
/// };
/// # let _ = policy;
/// ```
#[derive(Debug, Clone, Default)]
pub struct SmartEviction {
    pub ttl: Option<Duration>,
    pub max_idle: Option<Duration>,
    pub min_frequency: Option<u64>,
}

impl EvictionPolicy for SmartEviction {
    fn should_evict(&self, _key: &str, metadata: &ItemMetadata) -> bool {
        let since_use = Instant::now().duration_since(metadata.last_used);
        self.ttl.is_some_and(|ttl| since_use > ttl)
            || self.max_idle.is_some_and(|idle| since_use > idle)
            || self
                .min_frequency
                .is_some_and(|min| metadata.frequency < min)
    }
}
