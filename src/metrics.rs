//! Metrics collection and export for managed pools

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Point-in-time counters for one pool.
///
/// `current_usage` tracks net outstanding acquires; at any quiescent point it
/// equals `total_gets - total_puts` and it never goes negative.
///
/// # Examples
///
/// ```
/// use shardpool::{PoolAble, PoolConfiguration, PoolManager};
///
/// struct Buffer(Vec<u8>);
/// impl PoolAble for Buffer {
///     fn reset(&mut self) {
///         self.0.clear();
///     }
/// }
///
/// let manager = PoolManager::new();
/// manager
///     .add_pool("buffers", || Buffer(Vec::new()), PoolConfiguration::new())
///     .unwrap();
///
/// let buffer = manager.acquire_instance("buffers").unwrap();
/// let metrics = manager.get_metrics("buffers").unwrap();
/// assert_eq!(metrics.total_gets, 1);
/// assert_eq!(metrics.current_usage, 1);
/// # manager.release_instance("buffers", buffer).unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolMetrics {
    /// Total instances handed out.
    pub total_gets: u64,

    /// Total instances returned.
    pub total_puts: u64,

    /// Total bookkeeping entries evicted.
    pub total_evicts: u64,

    /// Acquires served from the hot-instance cache.
    pub cache_hits: u64,

    /// Net outstanding acquires right now.
    pub current_usage: u64,
}

/// Exporter for the Prometheus text exposition format.
pub struct MetricsExporter;

impl MetricsExporter {
    /// Render one pool's counters as Prometheus exposition text.
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        output.push_str("# HELP shardpool_in_use Instances currently handed out\n");
        output.push_str("# TYPE shardpool_in_use gauge\n");
        output.push_str(&format!(
            "shardpool_in_use{{{}}} {}\n",
            labels, metrics.current_usage
        ));

        output.push_str("# HELP shardpool_gets_total Total instances handed out\n");
        output.push_str("# TYPE shardpool_gets_total counter\n");
        output.push_str(&format!(
            "shardpool_gets_total{{{}}} {}\n",
            labels, metrics.total_gets
        ));

        output.push_str("# HELP shardpool_puts_total Total instances returned\n");
        output.push_str("# TYPE shardpool_puts_total counter\n");
        output.push_str(&format!(
            "shardpool_puts_total{{{}}} {}\n",
            labels, metrics.total_puts
        ));

        output.push_str("# HELP shardpool_evictions_total Total bookkeeping entries evicted\n");
        output.push_str("# TYPE shardpool_evictions_total counter\n");
        output.push_str(&format!(
            "shardpool_evictions_total{{{}}} {}\n",
            labels, metrics.total_evicts
        ));

        output.push_str("# HELP shardpool_cache_hits_total Acquires served from the cache\n");
        output.push_str("# TYPE shardpool_cache_hits_total counter\n");
        output.push_str(&format!(
            "shardpool_cache_hits_total{{{}}} {}\n",
            labels, metrics.cache_hits
        ));

        output
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal atomic counters behind a [`PoolMetrics`] snapshot.
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    total_gets: AtomicU64,
    total_puts: AtomicU64,
    total_evicts: AtomicU64,
    cache_hits: AtomicU64,
    current_usage: AtomicU64,
}

impl MetricsTracker {
    pub fn record_get(&self) {
        self.total_gets.fetch_add(1, Ordering::Relaxed);
        self.current_usage.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_put(&self) {
        self.total_puts.fetch_add(1, Ordering::Relaxed);
        // CAS loop so a stray unpaired put can never drive usage negative.
        let _ = self
            .current_usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |usage| {
                Some(usage.saturating_sub(1))
            });
    }

    pub fn record_evict(&self) {
        self.total_evicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn current_usage(&self) -> u64 {
        self.current_usage.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            total_gets: self.total_gets.load(Ordering::Relaxed),
            total_puts: self.total_puts.load(Ordering::Relaxed),
            total_evicts: self.total_evicts.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            current_usage: self.current_usage.load(Ordering::Acquire),
        }
    }
}

/// One tracker per registered pool.
#[derive(Debug, Default)]
pub(crate) struct MetricsRegistry {
    entries: DashMap<String, Arc<MetricsTracker>>,
}

impl MetricsRegistry {
    /// Resets the pool's counters to zero.
    pub fn init(&self, pool: &str) {
        self.entries
            .insert(pool.to_string(), Arc::new(MetricsTracker::default()));
    }

    /// Tracker for `pool`, created on demand.
    pub fn handle(&self, pool: &str) -> Arc<MetricsTracker> {
        self.entries
            .entry(pool.to_string())
            .or_default()
            .clone()
    }

    pub fn snapshot(&self, pool: &str) -> Option<PoolMetrics> {
        self.entries.get(pool).map(|tracker| tracker.snapshot())
    }

    pub fn remove(&self, pool: &str) {
        self.entries.remove(pool);
    }
}
