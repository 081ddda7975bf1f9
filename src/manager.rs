//! The pool registry: named pools, the acquire/release protocol, and the
//! wiring for sharding, caching, metrics, metadata, and background loops

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::background::{self, LoopHandles};
use crate::cache::CacheLayer;
use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolErrorKind, PoolResult};
use crate::eviction::{EvictionPolicy, TtlEviction};
use crate::metadata::{ItemMetadata, ItemStatus, MetadataStore};
use crate::metrics::{MetricsExporter, MetricsRegistry, PoolMetrics};
use crate::shard::ShardStore;
use crate::sharding::{RoundRobinSharding, ShardingStrategy};

/// The capability contract for pooled types.
///
/// `reset` must return the object to a reusable state indistinguishable, for
/// every field a caller may depend on, from a freshly factory-built one. It
/// is invoked exactly once per release, before the object becomes visible to
/// another acquirer.
pub trait PoolAble: Send + 'static {
    fn reset(&mut self);
}

type Factory<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Registry of named pools of one poolable type.
///
/// The registry owns each pool's storage, configuration, factory, metrics,
/// metadata, and cache entries. A caller receiving an instance from
/// [`acquire_instance`](PoolManager::acquire_instance) owns it exclusively
/// until it calls [`release_instance`](PoolManager::release_instance).
///
/// Cloning the manager produces another handle to the same registry.
///
/// # Examples
///
/// ```
/// use shardpool::{PoolAble, PoolConfiguration, PoolManager};
///
/// #[derive(Default)]
/// struct Session {
///     scratch: Vec<u8>,
/// }
///
/// impl PoolAble for Session {
///     fn reset(&mut self) {
///         self.scratch.clear();
///     }
/// }
///
/// let manager = PoolManager::new();
/// manager
///     .add_pool(
///         "sessions",
///         Session::default,
///         PoolConfiguration::new().with_initial_size(4),
///     )
///     .unwrap();
///
/// let session = manager.acquire_instance("sessions").unwrap();
/// manager.release_instance("sessions", session).unwrap();
/// assert_eq!(manager.get_pool_size("sessions"), 4);
/// ```
pub struct PoolManager<T: PoolAble> {
    inner: Arc<ManagerInner<T>>,
}

impl<T: PoolAble> Clone for PoolManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: PoolAble> Default for PoolManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared registry state. Each map is independently concurrency-safe; no
/// lock spans two of them, so no caller may assume atomicity across stores.
pub(crate) struct ManagerInner<T: PoolAble> {
    pools: DashMap<String, ShardStore<T>>,
    configs: DashMap<String, Arc<PoolConfiguration<T>>>,
    factories: DashMap<String, Factory<T>>,
    metrics: MetricsRegistry,
    pub(crate) metadata: MetadataStore,
    cache: CacheLayer<T>,
    loops: DashMap<String, LoopHandles>,
    default_sharding: RwLock<Arc<dyn ShardingStrategy>>,
    default_eviction: RwLock<Option<Arc<dyn EvictionPolicy>>>,
    route_seq: AtomicU64,
}

impl<T: PoolAble> Drop for ManagerInner<T> {
    fn drop(&mut self) {
        for mut entry in self.loops.iter_mut() {
            entry.value_mut().stop();
        }
    }
}

impl<T: PoolAble> PoolManager<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                pools: DashMap::new(),
                configs: DashMap::new(),
                factories: DashMap::new(),
                metrics: MetricsRegistry::default(),
                metadata: MetadataStore::default(),
                cache: CacheLayer::new(),
                loops: DashMap::new(),
                default_sharding: RwLock::new(Arc::new(RoundRobinSharding::new())),
                default_eviction: RwLock::new(None),
                route_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a new pool under `name`, pre-populating `initial_size`
    /// instances and starting the pool's background loops where the
    /// configuration asks for them.
    pub fn add_pool<F>(&self, name: &str, factory: F, config: PoolConfiguration<T>) -> PoolResult<()>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        config
            .validate()
            .map_err(|kind| PoolError::new(name, "add", kind))?;
        if self.inner.pools.contains_key(name) {
            return Err(PoolError::new(name, "add", PoolErrorKind::PoolAlreadyExists));
        }

        let factory: Factory<T> = Arc::new(factory);
        let shard_count = if config.sharding_enabled && config.shard_count > 1 {
            config.shard_count
        } else {
            1
        };
        let store = ShardStore::new(shard_count);
        for _ in 0..config.initial_size {
            let instance = factory();
            if let Some(cb) = &config.on_create {
                cb(name, &instance);
            }
            let index = match (&config.shard_strategy, shard_count) {
                (_, 1) => 0,
                (Some(strategy), _) => {
                    let seq = self.inner.route_seq.fetch_add(1, Ordering::Relaxed);
                    strategy.shard_index(name, shard_count, &seq.to_string()) % shard_count
                }
                // No strategy configured: spread the warm-up pseudo-randomly.
                (None, _) => rand::rng().random_range(0..shard_count),
            };
            store.push(index, instance);
        }

        match self.inner.pools.entry(name.to_string()) {
            Entry::Occupied(_) => {
                return Err(PoolError::new(name, "add", PoolErrorKind::PoolAlreadyExists));
            }
            Entry::Vacant(slot) => {
                slot.insert(store);
            }
        }
        let config = Arc::new(config);
        self.inner
            .configs
            .insert(name.to_string(), Arc::clone(&config));
        self.inner.factories.insert(name.to_string(), factory);
        self.inner.metrics.init(name);
        info!(pool = %name, config = ?config, "registered pool");

        self.spawn_background(name, &config);
        Ok(())
    }

    /// Borrows an instance from `name`, consulting the hot-instance cache
    /// first and falling back to the routed shard, then to the factory.
    pub fn acquire_instance(&self, name: &str) -> PoolResult<T> {
        self.inner.acquire(name, None)
    }

    /// Like [`acquire_instance`](Self::acquire_instance), but routes with the
    /// caller's key so hash-based sharding gets key affinity.
    pub fn acquire_instance_with_key(&self, name: &str, key: &str) -> PoolResult<T> {
        self.inner.acquire(name, Some(key))
    }

    /// Returns an instance to `name`. The instance is reset before it becomes
    /// visible to another acquirer.
    pub fn release_instance(&self, name: &str, instance: T) -> PoolResult<()> {
        self.inner.release(name, instance, None)
    }

    pub fn release_instance_with_key(&self, name: &str, instance: T, key: &str) -> PoolResult<()> {
        self.inner.release(name, instance, Some(key))
    }

    /// Deletes the pool and every associated store. Idempotent; unknown
    /// names are ignored.
    pub fn remove_pool(&self, name: &str) {
        self.inner.remove_pool(name);
    }

    /// Grows or shrinks the pool's free-lists toward `new_size` instances,
    /// spread across shards. Discarded instances are dropped without reset.
    /// Unknown pools log a warning and leave state untouched.
    pub fn resize_pool(&self, name: &str, new_size: usize) {
        self.inner.resize_pool(name, new_size);
    }

    /// Stored instances for `name`: free-list entries plus cached hot
    /// instances. Outstanding (acquired) instances are not counted.
    pub fn get_pool_size(&self, name: &str) -> usize {
        self.inner.stored_count(name)
    }

    pub fn get_shard_size(&self, name: &str, shard_index: usize) -> usize {
        self.inner
            .pools
            .get(name)
            .map(|store| store.shard_len(shard_index))
            .unwrap_or(0)
    }

    pub fn get_metrics(&self, name: &str) -> Option<PoolMetrics> {
        self.inner.metrics.snapshot(name)
    }

    /// Prometheus exposition text for one pool's counters.
    pub fn metrics_prometheus(
        &self,
        name: &str,
        tags: Option<&std::collections::HashMap<String, String>>,
    ) -> Option<String> {
        self.inner
            .metrics
            .snapshot(name)
            .map(|snapshot| MetricsExporter::export_prometheus(&snapshot, name, tags))
    }

    /// Swaps the registry-wide eviction policy consulted by pools that do
    /// not carry their own. Already-removed bookkeeping is unaffected.
    pub fn set_eviction_policy(&self, policy: Arc<dyn EvictionPolicy>) {
        *self.inner.default_eviction.write() = Some(policy);
        info!("eviction policy set");
    }

    /// Swaps the registry-wide sharding strategy used by pools that do not
    /// carry their own. Routing changes apply to subsequent operations only;
    /// already-stored instances are not re-routed.
    pub fn set_sharding_strategy(&self, strategy: Arc<dyn ShardingStrategy>) {
        *self.inner.default_sharding.write() = strategy;
        info!("sharding strategy set");
    }

    /// Runs one eviction sweep for `name` outside the scheduled loop.
    /// Returns the number of entries removed.
    pub fn run_eviction(&self, name: &str) -> usize {
        self.inner.run_eviction_sweep(name)
    }

    /// Removes a single tracked key outside the scheduled sweep.
    pub fn force_evict(&self, name: &str, key: &str) -> PoolResult<()> {
        self.inner.force_evict(name, key)
    }

    /// Starts tracking lifecycle metadata for a caller-chosen key.
    pub fn track_item(&self, name: &str, key: &str) {
        self.inner.metadata.record(name, key);
    }

    /// Lifecycle record for `key`, if one exists.
    pub fn item_metadata(&self, key: &str) -> Option<ItemMetadata> {
        self.inner.metadata.get(key)
    }

    /// Gives `key` a hard expiry honored by the evictor regardless of the
    /// configured policy.
    pub fn set_item_expiration(&self, key: &str, after: Duration) -> bool {
        self.inner
            .metadata
            .update(key, |meta| meta.expiration_time = Some(Instant::now() + after))
    }

    /// Starts the auto-tune loop for `name` if it is not already running.
    pub fn start_auto_tuning(&self, name: &str) {
        let Some(config) = self.inner.config_of(name) else {
            warn!(pool = %name, "cannot start auto-tuning for unknown pool");
            return;
        };
        let interval = if config.auto_tune_interval.is_zero() {
            Duration::from_secs(60)
        } else {
            config.auto_tune_interval
        };
        let mut handles = self
            .inner
            .loops
            .entry(name.to_string())
            .or_insert_with(LoopHandles::new);
        if handles.tuner_running() {
            debug!(pool = %name, "auto-tuning already running");
            return;
        }
        let task = background::spawn_tuner(
            Arc::downgrade(&self.inner),
            name.to_string(),
            interval,
            handles.subscribe(),
        );
        handles.set_tuner(task);
    }

    /// Stops the pool's background loops. Idempotent; stopping a pool with
    /// nothing running is a logged no-op, and a later start finds a fresh
    /// stop signal.
    pub fn stop_auto_tuning(&self, name: &str) {
        match self.inner.loops.get_mut(name) {
            Some(mut handles) if handles.any_running() => {
                handles.stop();
                info!(pool = %name, "auto-tuning stopped");
            }
            _ => debug!(pool = %name, "auto-tuning is not running"),
        }
    }

    /// Stops every pool's background loops. Safe to call repeatedly.
    pub fn shutdown(&self) {
        for mut entry in self.inner.loops.iter_mut() {
            if entry.value().any_running() {
                entry.value_mut().stop();
            }
        }
    }

    fn spawn_background(&self, name: &str, config: &PoolConfiguration<T>) {
        let tune = config.auto_tune && !config.auto_tune_interval.is_zero();
        if config.auto_tune && config.auto_tune_interval.is_zero() {
            warn!(pool = %name, "invalid auto-tune interval, auto-tuning not started");
        }
        let evict = (config.ttl.is_some() || config.eviction_policy.is_some())
            && !config.eviction_interval.is_zero();
        if !tune && !evict {
            return;
        }
        let mut handles = self
            .inner
            .loops
            .entry(name.to_string())
            .or_insert_with(LoopHandles::new);
        if tune && !handles.tuner_running() {
            let task = background::spawn_tuner(
                Arc::downgrade(&self.inner),
                name.to_string(),
                config.auto_tune_interval,
                handles.subscribe(),
            );
            handles.set_tuner(task);
        }
        if evict && !handles.evictor_running() {
            let task = background::spawn_evictor(
                Arc::downgrade(&self.inner),
                name.to_string(),
                config.eviction_interval,
                handles.subscribe(),
            );
            handles.set_evictor(task);
        }
    }
}

impl<T: PoolAble> ManagerInner<T> {
    fn config_of(&self, name: &str) -> Option<Arc<PoolConfiguration<T>>> {
        self.configs.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Builds the error and routes it through the pool's `on_error` hook.
    fn fail(&self, name: &str, operation: &'static str, kind: PoolErrorKind) -> PoolError {
        let err = PoolError::new(name, operation, kind);
        if let Some(config) = self.config_of(name) {
            if let Some(cb) = &config.on_error {
                cb(name, &err);
            }
        }
        err
    }

    fn route(&self, name: &str, config: &PoolConfiguration<T>, key: Option<&str>) -> usize {
        let strategy = config
            .shard_strategy
            .clone()
            .unwrap_or_else(|| Arc::clone(&*self.default_sharding.read()));
        let index = match key {
            Some(key) => strategy.shard_index(name, config.shard_count, key),
            None => {
                let seq = self.route_seq.fetch_add(1, Ordering::Relaxed);
                strategy.shard_index(name, config.shard_count, &seq.to_string())
            }
        };
        // Out-of-contract strategies are wrapped rather than indexing out of
        // bounds.
        index % config.shard_count
    }

    fn stored_count(&self, name: &str) -> usize {
        let in_store = self
            .pools
            .get(name)
            .map(|store| store.total_len())
            .unwrap_or(0);
        in_store + self.cache.len(name)
    }

    /// Checks that the pool's storage matches its sharding configuration and
    /// returns the shard count to route across.
    fn shard_layout(
        &self,
        name: &str,
        config: &PoolConfiguration<T>,
        operation: &'static str,
    ) -> PoolResult<bool> {
        let sharded = config.sharding_enabled && config.shard_count > 1;
        if sharded {
            let stored = self
                .pools
                .get(name)
                .map(|store| store.shard_count())
                .unwrap_or(0);
            if stored != config.shard_count {
                return Err(self.fail(
                    name,
                    operation,
                    PoolErrorKind::InvalidShardState(format!(
                        "configuration expects {} shards, storage has {}",
                        config.shard_count, stored
                    )),
                ));
            }
        }
        Ok(sharded)
    }

    fn acquire(&self, name: &str, key: Option<&str>) -> PoolResult<T> {
        let Some(config) = self.config_of(name) else {
            return Err(PoolError::new(name, "get", PoolErrorKind::PoolNotFound));
        };

        if config.enable_caching {
            if let Some(value) = self.cache.take(name) {
                let metrics = self.metrics.handle(name);
                metrics.record_get();
                metrics.record_cache_hit();
                self.metadata.touch(name, name, ItemStatus::Active);
                if let Some(cb) = &config.on_get {
                    cb(name);
                }
                return Ok(value);
            }
        }

        if !self.pools.contains_key(name) {
            return Err(self.fail(name, "get", PoolErrorKind::PoolNotFound));
        }
        let sharded = self.shard_layout(name, &config, "get")?;
        let index = if sharded {
            self.route(name, &config, key)
        } else {
            0
        };
        let popped = self.pools.get(name).and_then(|store| store.pop(index));

        let value = match popped {
            Some(value) => value,
            None => {
                // Miss: synthesize a fresh instance, unless the cap says no.
                if config.size_limit > 0
                    && self.metrics.handle(name).current_usage() as usize >= config.size_limit
                {
                    return Err(self.fail(
                        name,
                        "get",
                        PoolErrorKind::SizeLimitReached {
                            limit: config.size_limit,
                        },
                    ));
                }
                let Some(factory) = self.factories.get(name).map(|f| Arc::clone(f.value()))
                else {
                    return Err(self.fail(name, "get", PoolErrorKind::PoolNotFound));
                };
                let instance = factory();
                if let Some(cb) = &config.on_create {
                    cb(name, &instance);
                }
                instance
            }
        };

        self.metrics.handle(name).record_get();
        self.metadata.touch(name, name, ItemStatus::Active);
        if let Some(cb) = &config.on_get {
            cb(name);
        }
        Ok(value)
    }

    fn release(&self, name: &str, mut instance: T, key: Option<&str>) -> PoolResult<()> {
        let Some(config) = self.config_of(name) else {
            return Err(PoolError::new(name, "put", PoolErrorKind::PoolNotFound));
        };
        if !self.pools.contains_key(name) {
            return Err(self.fail(name, "put", PoolErrorKind::PoolNotFound));
        }

        instance.reset();
        if let Some(cb) = &config.on_reset {
            cb(name, &instance);
        }

        if config.enable_caching {
            if let Some(demoted) = self.cache.insert(name, instance, config.cache_max_size) {
                self.push_to_store(name, &config, demoted, key)?;
            }
        } else {
            self.push_to_store(name, &config, instance, key)?;
        }

        self.metadata.touch(name, name, ItemStatus::Idle);
        self.metrics.handle(name).record_put();
        if let Some(cb) = &config.on_put {
            cb(name);
        }
        Ok(())
    }

    fn push_to_store(
        &self,
        name: &str,
        config: &PoolConfiguration<T>,
        value: T,
        key: Option<&str>,
    ) -> PoolResult<()> {
        let sharded = self.shard_layout(name, config, "put")?;
        let index = if sharded {
            self.route(name, config, key)
        } else {
            0
        };
        match self.pools.get(name) {
            Some(store) => {
                store.push(index, value);
                Ok(())
            }
            None => Err(self.fail(name, "put", PoolErrorKind::PoolNotFound)),
        }
    }

    pub(crate) fn remove_pool(&self, name: &str) {
        if let Some((_, mut handles)) = self.loops.remove(name) {
            handles.stop();
        }
        self.pools.remove(name);
        self.configs.remove(name);
        self.factories.remove(name);
        self.metrics.remove(name);
        self.cache.remove_pool(name);
        self.metadata.remove_pool(name);
        debug!(pool = %name, "removed pool");
    }

    pub(crate) fn resize_pool(&self, name: &str, new_size: usize) {
        let Some(config) = self.config_of(name) else {
            warn!(pool = %name, "pool does not exist, cannot resize");
            return;
        };
        let Some(factory) = self.factories.get(name).map(|f| Arc::clone(f.value())) else {
            warn!(pool = %name, "no factory registered, cannot resize");
            return;
        };
        let Some(store) = self.pools.get(name) else {
            warn!(pool = %name, "no storage registered, cannot resize");
            return;
        };

        let shard_count = store.shard_count();
        let base = new_size / shard_count;
        let remainder = new_size % shard_count;
        for index in 0..shard_count {
            let target = base + usize::from(index < remainder);
            let mut current = store.shard_len(index);
            while current < target {
                let instance = factory();
                if let Some(cb) = &config.on_create {
                    cb(name, &instance);
                }
                store.push(index, instance);
                current += 1;
            }
            // Shrinking discards: no reset, no on_put.
            while current > target {
                match store.pop(index) {
                    Some(discarded) => {
                        if let Some(cb) = &config.on_destroy {
                            cb(name, &discarded);
                        }
                        current -= 1;
                    }
                    None => break,
                }
            }
        }
        info!(pool = %name, new_size, "resized pool");
    }

    pub(crate) fn auto_tune_pool(&self, name: &str) {
        let Some(config) = self.config_of(name) else {
            return;
        };
        if !config.auto_tune {
            return;
        }
        let current = self.stored_count(name);
        if current == 0 {
            debug!(pool = %name, "auto-tuning skipped, pool is empty");
            return;
        }

        let factor = match &config.auto_tune_dynamic_factor {
            Some(dynamic) => dynamic(current),
            None => config.auto_tune_factor,
        };
        let target = ((current as f64) * factor) as usize;
        let target = target.clamp(config.min_size, config.max_size);
        if target == current {
            return;
        }

        let previous = self.metadata.get(name).map(|meta| meta.status);
        self.metadata.set_status(name, ItemStatus::Tuning);
        self.resize_pool(name, target);
        if let Some(previous) = previous {
            self.metadata.set_status(name, previous);
        }
        if let Some(cb) = &config.on_auto_tune {
            cb(name, target);
        }
        info!(pool = %name, from = current, to = target, "auto-tuned pool");
    }

    pub(crate) fn run_eviction_sweep(&self, name: &str) -> usize {
        let Some(config) = self.config_of(name) else {
            return 0;
        };
        let policy = config
            .eviction_policy
            .clone()
            .or_else(|| self.default_eviction.read().clone())
            .or_else(|| {
                config
                    .ttl
                    .map(|ttl| Arc::new(TtlEviction { ttl }) as Arc<dyn EvictionPolicy>)
            });

        let now = Instant::now();
        let mut evicted = 0;
        for key in self.metadata.keys_for_pool(name) {
            let Some(meta) = self.metadata.get(&key) else {
                continue;
            };
            let stale = meta.expired_intrinsically(now)
                || policy
                    .as_ref()
                    .is_some_and(|policy| policy.should_evict(&key, &meta));
            if stale {
                self.evict_key(name, &key, &config);
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(pool = %name, evicted, "eviction sweep removed stale entries");
        }
        evicted
    }

    pub(crate) fn force_evict(&self, name: &str, key: &str) -> PoolResult<()> {
        let tracked = self
            .metadata
            .get(key)
            .is_some_and(|meta| meta.pool_name == name);
        if !tracked {
            return Err(self.fail(
                name,
                "evict",
                PoolErrorKind::ItemNotFound {
                    key: key.to_string(),
                },
            ));
        }
        let Some(config) = self.config_of(name) else {
            return Err(self.fail(name, "evict", PoolErrorKind::PoolNotFound));
        };
        self.evict_key(name, key, &config);
        Ok(())
    }

    /// Removes one key's bookkeeping: metadata always, cached instances when
    /// the key is the pool's own record. Free-lists are never touched.
    fn evict_key(&self, name: &str, key: &str, config: &PoolConfiguration<T>) {
        // Stop concurrent touches from resurrecting the entry mid-removal.
        self.metadata.set_status(key, ItemStatus::Evicted);
        self.metadata.remove(key);
        if key == name {
            for discarded in self.cache.purge(name) {
                if let Some(cb) = &config.on_destroy {
                    cb(name, &discarded);
                }
            }
        }
        self.metrics.handle(name).record_evict();
        if let Some(cb) = &config.on_evict {
            cb(name);
        }
        debug!(pool = %name, key = %key, "evicted item bookkeeping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eviction::LfuEviction;
    use crate::sharding::{FnSharding, HashSharding};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct Widget {
        payload: Vec<u8>,
        resets: Arc<AtomicUsize>,
    }

    impl PoolAble for Widget {
        fn reset(&mut self) {
            self.payload.clear();
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn widget_pool(manager: &PoolManager<Widget>, name: &str, config: PoolConfiguration<Widget>) -> Arc<AtomicUsize> {
        let resets = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&resets);
        manager
            .add_pool(
                name,
                move || Widget {
                    payload: Vec::new(),
                    resets: Arc::clone(&counter),
                },
                config,
            )
            .unwrap();
        resets
    }

    #[test]
    fn add_pool_rejects_duplicates_and_keeps_the_first() {
        let manager = PoolManager::new();
        widget_pool(&manager, "p", PoolConfiguration::new().with_initial_size(2));

        let err = manager
            .add_pool(
                "p",
                || Widget {
                    payload: Vec::new(),
                    resets: Arc::new(AtomicUsize::new(0)),
                },
                PoolConfiguration::new().with_initial_size(9),
            )
            .unwrap_err();
        assert_eq!(*err.kind(), PoolErrorKind::PoolAlreadyExists);
        assert_eq!(manager.get_pool_size("p"), 2);
    }

    #[test]
    fn add_pool_validates_configuration() {
        let manager: PoolManager<Widget> = PoolManager::new();
        let err = manager
            .add_pool(
                "p",
                || Widget {
                    payload: Vec::new(),
                    resets: Arc::new(AtomicUsize::new(0)),
                },
                PoolConfiguration::new().with_sharding(1),
            )
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            PoolErrorKind::InvalidConfiguration(_)
        ));
    }

    #[test]
    fn acquire_from_unknown_pool_fails() {
        let manager: PoolManager<Widget> = PoolManager::new();
        let err = manager.acquire_instance("missing").unwrap_err();
        assert_eq!(*err.kind(), PoolErrorKind::PoolNotFound);
    }

    #[test]
    fn release_to_unknown_pool_fails() {
        let manager: PoolManager<Widget> = PoolManager::new();
        let widget = Widget {
            payload: Vec::new(),
            resets: Arc::new(AtomicUsize::new(0)),
        };
        let err = manager.release_instance("missing", widget).unwrap_err();
        assert_eq!(*err.kind(), PoolErrorKind::PoolNotFound);
    }

    #[test]
    fn empty_pool_falls_back_to_the_factory() {
        let manager = PoolManager::new();
        widget_pool(&manager, "p", PoolConfiguration::new());
        assert_eq!(manager.get_pool_size("p"), 0);

        let widget = manager.acquire_instance("p").unwrap();
        manager.release_instance("p", widget).unwrap();
        assert_eq!(manager.get_pool_size("p"), 1);
    }

    #[test]
    fn release_resets_exactly_once_per_return() {
        let manager = PoolManager::new();
        let resets = widget_pool(&manager, "p", PoolConfiguration::new().with_initial_size(1));

        for _ in 0..5 {
            let widget = manager.acquire_instance("p").unwrap();
            manager.release_instance("p", widget).unwrap();
        }
        assert_eq!(resets.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn usage_metric_balances_gets_and_puts() {
        let manager = PoolManager::new();
        widget_pool(&manager, "p", PoolConfiguration::new().with_initial_size(2));

        let a = manager.acquire_instance("p").unwrap();
        let b = manager.acquire_instance("p").unwrap();
        let metrics = manager.get_metrics("p").unwrap();
        assert_eq!(metrics.current_usage, 2);
        assert_eq!(metrics.total_gets, 2);

        manager.release_instance("p", a).unwrap();
        manager.release_instance("p", b).unwrap();
        let metrics = manager.get_metrics("p").unwrap();
        assert_eq!(metrics.current_usage, 0);
        assert_eq!(metrics.total_gets - metrics.total_puts, 0);
    }

    #[test]
    fn concurrent_acquire_release_balances_to_zero() {
        let manager = PoolManager::new();
        widget_pool(&manager, "p", PoolConfiguration::new().with_initial_size(4));

        let workers: Vec<_> = (0..10)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let widget = manager.acquire_instance("p").unwrap();
                        manager.release_instance("p", widget).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let metrics = manager.get_metrics("p").unwrap();
        assert_eq!(metrics.total_gets, 10_000);
        assert_eq!(metrics.total_puts, 10_000);
        assert_eq!(metrics.current_usage, 0);
    }

    #[test]
    fn remove_pool_is_idempotent_and_forgets_the_name() {
        let manager = PoolManager::new();
        widget_pool(&manager, "p", PoolConfiguration::new().with_initial_size(1));

        manager.remove_pool("p");
        manager.remove_pool("p");
        let err = manager.acquire_instance("p").unwrap_err();
        assert_eq!(*err.kind(), PoolErrorKind::PoolNotFound);
        assert!(manager.get_metrics("p").is_none());
    }

    #[test]
    fn resize_grows_and_shrinks_without_reset_or_put() {
        let manager = PoolManager::new();
        let destroys = Arc::new(AtomicUsize::new(0));
        let puts = Arc::new(AtomicUsize::new(0));
        let destroys_cb = Arc::clone(&destroys);
        let puts_cb = Arc::clone(&puts);
        let resets = widget_pool(
            &manager,
            "p",
            PoolConfiguration::new()
                .with_initial_size(2)
                .with_on_destroy(move |_, _| {
                    destroys_cb.fetch_add(1, Ordering::SeqCst);
                })
                .with_on_put(move |_| {
                    puts_cb.fetch_add(1, Ordering::SeqCst);
                }),
        );

        manager.resize_pool("p", 6);
        assert_eq!(manager.get_pool_size("p"), 6);

        manager.resize_pool("p", 2);
        assert_eq!(manager.get_pool_size("p"), 2);
        assert_eq!(destroys.load(Ordering::SeqCst), 4);
        assert_eq!(resets.load(Ordering::SeqCst), 0);
        assert_eq!(puts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn resize_of_unknown_pool_is_a_noop() {
        let manager: PoolManager<Widget> = PoolManager::new();
        manager.resize_pool("missing", 10);
    }

    #[test]
    fn size_limit_caps_outstanding_instances() {
        let manager = PoolManager::new();
        widget_pool(&manager, "p", PoolConfiguration::new().with_size_limit(2));

        let a = manager.acquire_instance("p").unwrap();
        let _b = manager.acquire_instance("p").unwrap();
        let err = manager.acquire_instance("p").unwrap_err();
        assert_eq!(*err.kind(), PoolErrorKind::SizeLimitReached { limit: 2 });

        manager.release_instance("p", a).unwrap();
        assert!(manager.acquire_instance("p").is_ok());
    }

    #[test]
    fn cache_hit_serves_the_hot_instance() {
        let manager = PoolManager::new();
        widget_pool(
            &manager,
            "p",
            PoolConfiguration::new().with_initial_size(1).with_caching(2),
        );

        let widget = manager.acquire_instance("p").unwrap();
        manager.release_instance("p", widget).unwrap();

        let _again = manager.acquire_instance("p").unwrap();
        let metrics = manager.get_metrics("p").unwrap();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.total_gets, 2);
    }

    #[test]
    fn cache_overflow_demotes_to_the_free_lists() {
        let manager = PoolManager::new();
        widget_pool(
            &manager,
            "p",
            PoolConfiguration::new().with_initial_size(2).with_caching(1),
        );

        let a = manager.acquire_instance("p").unwrap();
        let b = manager.acquire_instance("p").unwrap();
        manager.release_instance("p", a).unwrap();
        manager.release_instance("p", b).unwrap();

        // One instance in the cache row, the demoted one back in the store.
        assert_eq!(manager.inner.cache.len("p"), 1);
        assert_eq!(manager.get_pool_size("p"), 2);
    }

    #[test]
    fn ttl_sweep_evicts_backdated_entries_only() {
        let manager = PoolManager::new();
        widget_pool(
            &manager,
            "p",
            PoolConfiguration::new()
                .with_initial_size(1)
                .with_ttl(Duration::from_millis(100)),
        );

        let widget = manager.acquire_instance("p").unwrap();
        manager.release_instance("p", widget).unwrap();

        // Fresh entry survives the sweep.
        assert_eq!(manager.run_eviction("p"), 0);

        manager.inner.metadata.update("p", |meta| {
            meta.last_used = Instant::now() - Duration::from_millis(200);
        });
        assert_eq!(manager.run_eviction("p"), 1);
        assert!(manager.item_metadata("p").is_none());
        assert_eq!(manager.get_metrics("p").unwrap().total_evicts, 1);
    }

    #[test]
    fn registry_default_policy_applies_when_pool_has_none() {
        let manager = PoolManager::new();
        widget_pool(&manager, "p", PoolConfiguration::new().with_initial_size(1));

        let widget = manager.acquire_instance("p").unwrap();
        manager.release_instance("p", widget).unwrap();

        manager.set_eviction_policy(Arc::new(LfuEviction { min_frequency: 100 }));
        assert_eq!(manager.run_eviction("p"), 1);
    }

    #[test]
    fn intrinsic_expiry_beats_the_policy() {
        let manager = PoolManager::new();
        widget_pool(&manager, "p", PoolConfiguration::new().with_initial_size(1));

        manager.track_item("p", "p:lease-7");
        assert!(manager.set_item_expiration("p:lease-7", Duration::ZERO));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(manager.run_eviction("p"), 1);
        assert!(manager.item_metadata("p:lease-7").is_none());
    }

    #[test]
    fn force_evict_requires_tracked_keys() {
        let manager = PoolManager::new();
        let evictions = Arc::new(AtomicUsize::new(0));
        let evictions_cb = Arc::clone(&evictions);
        widget_pool(
            &manager,
            "p",
            PoolConfiguration::new()
                .with_initial_size(1)
                .with_on_evict(move |_| {
                    evictions_cb.fetch_add(1, Ordering::SeqCst);
                }),
        );

        manager.track_item("p", "p:conn-1");
        manager.force_evict("p", "p:conn-1").unwrap();
        assert_eq!(evictions.load(Ordering::SeqCst), 1);

        let err = manager.force_evict("p", "p:conn-1").unwrap_err();
        assert_eq!(
            *err.kind(),
            PoolErrorKind::ItemNotFound {
                key: "p:conn-1".to_string()
            }
        );
    }

    #[test]
    fn sharded_pool_routes_deterministically_by_key() {
        let manager = PoolManager::new();
        widget_pool(
            &manager,
            "p",
            PoolConfiguration::new()
                .with_initial_size(8)
                .with_sharding(4)
                .with_shard_strategy(Arc::new(HashSharding::new())),
        );

        let total: usize = (0..4).map(|i| manager.get_shard_size("p", i)).sum();
        assert_eq!(total, 8);

        // Same key, same shard: releasing twice with one key lands twice in
        // one shard.
        let a = manager.acquire_instance_with_key("p", "tenant-9").unwrap();
        let b = manager.acquire_instance_with_key("p", "tenant-9").unwrap();
        let before: Vec<usize> = (0..4).map(|i| manager.get_shard_size("p", i)).collect();
        manager
            .release_instance_with_key("p", a, "tenant-9")
            .unwrap();
        manager
            .release_instance_with_key("p", b, "tenant-9")
            .unwrap();
        let after: Vec<usize> = (0..4).map(|i| manager.get_shard_size("p", i)).collect();
        let grown: Vec<usize> = (0..4).filter(|&i| after[i] != before[i]).collect();
        assert_eq!(grown.len(), 1);
        assert_eq!(after[grown[0]], before[grown[0]] + 2);
    }

    #[test]
    fn swapped_sharding_strategy_routes_subsequent_operations() {
        let manager = PoolManager::new();
        widget_pool(&manager, "p", PoolConfiguration::new().with_sharding(3));

        manager.set_sharding_strategy(Arc::new(FnSharding(
            |_pool: &str, _shard_count: usize, _key: &str| 0usize,
        )));

        let widgets: Vec<_> = (0..3)
            .map(|_| manager.acquire_instance("p").unwrap())
            .collect();
        for widget in widgets {
            manager.release_instance("p", widget).unwrap();
        }
        assert_eq!(manager.get_shard_size("p", 0), 3);
        assert_eq!(manager.get_shard_size("p", 1), 0);
        assert_eq!(manager.get_shard_size("p", 2), 0);
    }

    #[test]
    fn auto_tune_scales_by_factor_within_bounds() {
        let manager = PoolManager::new();
        let tunings = Arc::new(Mutex::new(Vec::new()));
        let tunings_cb = Arc::clone(&tunings);
        widget_pool(
            &manager,
            "p",
            PoolConfiguration::new()
                .with_min_size(1)
                .with_initial_size(3)
                .with_max_size(10)
                .with_auto_tune(Duration::from_secs(3600), 2.0)
                .with_on_auto_tune(move |pool, new_size| {
                    tunings_cb.lock().push((pool.to_string(), new_size));
                }),
        );

        manager.inner.auto_tune_pool("p");
        assert_eq!(manager.get_pool_size("p"), 6);

        manager.resize_pool("p", 8);
        manager.inner.auto_tune_pool("p");
        assert_eq!(manager.get_pool_size("p"), 10);

        let recorded = tunings.lock().clone();
        assert_eq!(
            recorded,
            vec![("p".to_string(), 6), ("p".to_string(), 10)]
        );
    }

    #[test]
    fn auto_tune_skips_empty_pools() {
        let manager = PoolManager::new();
        let tuned = Arc::new(AtomicUsize::new(0));
        let tuned_cb = Arc::clone(&tuned);
        widget_pool(
            &manager,
            "p",
            PoolConfiguration::new()
                .with_min_size(1)
                .with_initial_size(1)
                .with_max_size(10)
                .with_auto_tune(Duration::from_secs(3600), 2.0)
                .with_on_auto_tune(move |_, _| {
                    tuned_cb.fetch_add(1, Ordering::SeqCst);
                }),
        );
        // Drain the pool so the tuner sees nothing to work with.
        let _held = manager.acquire_instance("p").unwrap();

        manager.inner.auto_tune_pool("p");
        assert_eq!(manager.get_pool_size("p"), 0);
        assert_eq!(tuned.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dynamic_factor_overrides_the_static_one() {
        let manager = PoolManager::new();
        widget_pool(
            &manager,
            "p",
            PoolConfiguration::new()
                .with_initial_size(2)
                .with_max_size(32)
                .with_auto_tune(Duration::from_secs(3600), 1.0)
                .with_dynamic_auto_tune_factor(|size| if size < 10 { 3.0 } else { 1.0 }),
        );

        manager.inner.auto_tune_pool("p");
        assert_eq!(manager.get_pool_size("p"), 6);
    }

    #[test]
    fn on_error_sees_every_pool_scoped_failure() {
        let manager = PoolManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        widget_pool(
            &manager,
            "p",
            PoolConfiguration::new()
                .with_size_limit(1)
                .with_on_error(move |pool, err| {
                    seen_cb.lock().push((pool.to_string(), err.kind().clone()));
                }),
        );

        let _held = manager.acquire_instance("p").unwrap();
        let _ = manager.acquire_instance("p").unwrap_err();

        let recorded = seen.lock().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "p");
        assert_eq!(recorded[0].1, PoolErrorKind::SizeLimitReached { limit: 1 });
    }

    #[tokio::test]
    async fn tuner_loop_grows_the_pool_until_stopped() {
        let manager = PoolManager::new();
        widget_pool(
            &manager,
            "p",
            PoolConfiguration::new()
                .with_min_size(1)
                .with_initial_size(2)
                .with_max_size(8)
                .with_auto_tune(Duration::from_millis(20), 2.0),
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.get_pool_size("p"), 8);

        manager.stop_auto_tuning("p");
        manager.resize_pool("p", 2);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(manager.get_pool_size("p"), 2);
    }

    #[tokio::test]
    async fn evictor_loop_removes_stale_bookkeeping() {
        let manager = PoolManager::new();
        widget_pool(
            &manager,
            "p",
            PoolConfiguration::new()
                .with_initial_size(1)
                .with_ttl(Duration::from_millis(30))
                .with_eviction_interval(Duration::from_millis(20)),
        );

        let widget = manager.acquire_instance("p").unwrap();
        manager.release_instance("p", widget).unwrap();
        assert!(manager.item_metadata("p").is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(manager.item_metadata("p").is_none());
        assert!(manager.get_metrics("p").unwrap().total_evicts >= 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_start_works_after_stop() {
        let manager = PoolManager::new();
        widget_pool(
            &manager,
            "p",
            PoolConfiguration::new()
                .with_min_size(1)
                .with_initial_size(2)
                .with_max_size(8)
                .with_auto_tune(Duration::from_millis(20), 2.0),
        );

        manager.stop_auto_tuning("p");
        manager.stop_auto_tuning("p");
        manager.stop_auto_tuning("missing");

        manager.start_auto_tuning("p");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.get_pool_size("p"), 8);

        manager.shutdown();
        manager.shutdown();
    }
}
