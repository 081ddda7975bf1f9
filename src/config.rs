//! Pool configuration options

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{PoolError, PoolErrorKind};
use crate::eviction::EvictionPolicy;
use crate::sharding::ShardingStrategy;

/// Callback fired with the pool name (`on_get`, `on_put`, `on_evict`).
pub type PoolCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback fired with the pool name and its new size (`on_auto_tune`).
pub type ResizeCallback = Arc<dyn Fn(&str, usize) + Send + Sync>;

/// Callback fired with the pool name and an instance (`on_create`,
/// `on_destroy`, `on_reset`).
pub type InstanceCallback<T> = Arc<dyn Fn(&str, &T) + Send + Sync>;

/// Callback fired with the pool name and the error (`on_error`).
pub type ErrorCallback = Arc<dyn Fn(&str, &PoolError) + Send + Sync>;

/// Auto-tune factor computed from the pool's current size, for non-linear
/// tuning curves.
pub type DynamicFactor = Arc<dyn Fn(usize) -> f64 + Send + Sync>;

/// Configuration for one named pool, immutable once registered.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use shardpool::PoolConfiguration;
///
/// let config = PoolConfiguration::<i32>::new()
///     .with_initial_size(8)
///     .with_max_size(64)
///     .with_sharding(4)
///     .with_ttl(Duration::from_secs(3600));
///
/// assert_eq!(config.initial_size, 8);
/// assert_eq!(config.shard_count, 4);
/// assert!(config.validate().is_ok());
/// ```
pub struct PoolConfiguration<T> {
    /// Hard cap on outstanding instances; 0 disables the cap.
    pub size_limit: usize,

    /// Lower bound for auto-tuned pool size.
    pub min_size: usize,

    /// Upper bound for auto-tuned pool size.
    pub max_size: usize,

    /// Instances created up front when the pool is registered.
    pub initial_size: usize,

    /// Whether the background auto-tuner resizes this pool.
    pub auto_tune: bool,

    /// Tick interval of the auto-tuner loop.
    pub auto_tune_interval: Duration,

    /// Static growth/shrink factor applied to the current size.
    pub auto_tune_factor: f64,

    /// Optional dynamic factor; takes precedence over `auto_tune_factor`.
    pub auto_tune_dynamic_factor: Option<DynamicFactor>,

    /// Whether released instances pass through the hot-instance cache.
    pub enable_caching: bool,

    /// Cached instances kept per pool before overflow demotes to the
    /// free-lists.
    pub cache_max_size: usize,

    /// Whether the pool's storage is split into independent shards.
    pub sharding_enabled: bool,

    /// Number of shards; must be at least 2 when sharding is enabled.
    pub shard_count: usize,

    /// Routing strategy for this pool; falls back to the registry default
    /// when unset.
    pub shard_strategy: Option<Arc<dyn ShardingStrategy>>,

    /// Time-to-live driving the default eviction policy.
    pub ttl: Option<Duration>,

    /// Eviction policy for this pool; falls back to the registry default,
    /// then to a TTL policy when `ttl` is set.
    pub eviction_policy: Option<Arc<dyn EvictionPolicy>>,

    /// Tick interval of the evictor loop.
    pub eviction_interval: Duration,

    pub on_get: Option<PoolCallback>,
    pub on_put: Option<PoolCallback>,
    pub on_evict: Option<PoolCallback>,
    pub on_auto_tune: Option<ResizeCallback>,
    pub on_create: Option<InstanceCallback<T>>,
    pub on_destroy: Option<InstanceCallback<T>>,
    pub on_reset: Option<InstanceCallback<T>>,
    pub on_error: Option<ErrorCallback>,
}

impl<T> Default for PoolConfiguration<T> {
    fn default() -> Self {
        Self {
            size_limit: 0,
            min_size: 0,
            max_size: 1024,
            initial_size: 0,
            auto_tune: false,
            auto_tune_interval: Duration::from_secs(60),
            auto_tune_factor: 1.0,
            auto_tune_dynamic_factor: None,
            enable_caching: false,
            cache_max_size: 16,
            sharding_enabled: false,
            shard_count: 1,
            shard_strategy: None,
            ttl: None,
            eviction_policy: None,
            eviction_interval: Duration::from_secs(30),
            on_get: None,
            on_put: None,
            on_evict: None,
            on_auto_tune: None,
            on_create: None,
            on_destroy: None,
            on_reset: None,
            on_error: None,
        }
    }
}

impl<T> Clone for PoolConfiguration<T> {
    fn clone(&self) -> Self {
        Self {
            size_limit: self.size_limit,
            min_size: self.min_size,
            max_size: self.max_size,
            initial_size: self.initial_size,
            auto_tune: self.auto_tune,
            auto_tune_interval: self.auto_tune_interval,
            auto_tune_factor: self.auto_tune_factor,
            auto_tune_dynamic_factor: self.auto_tune_dynamic_factor.clone(),
            enable_caching: self.enable_caching,
            cache_max_size: self.cache_max_size,
            sharding_enabled: self.sharding_enabled,
            shard_count: self.shard_count,
            shard_strategy: self.shard_strategy.clone(),
            ttl: self.ttl,
            eviction_policy: self.eviction_policy.clone(),
            eviction_interval: self.eviction_interval,
            on_get: self.on_get.clone(),
            on_put: self.on_put.clone(),
            on_evict: self.on_evict.clone(),
            on_auto_tune: self.on_auto_tune.clone(),
            on_create: self.on_create.clone(),
            on_destroy: self.on_destroy.clone(),
            on_reset: self.on_reset.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<T> fmt::Debug for PoolConfiguration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfiguration")
            .field("size_limit", &self.size_limit)
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("initial_size", &self.initial_size)
            .field("auto_tune", &self.auto_tune)
            .field("auto_tune_interval", &self.auto_tune_interval)
            .field("auto_tune_factor", &self.auto_tune_factor)
            .field("enable_caching", &self.enable_caching)
            .field("cache_max_size", &self.cache_max_size)
            .field("sharding_enabled", &self.sharding_enabled)
            .field("shard_count", &self.shard_count)
            .field("ttl", &self.ttl)
            .field("eviction_interval", &self.eviction_interval)
            .finish_non_exhaustive()
    }
}

impl<T> PoolConfiguration<T> {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap outstanding instances; acquisition fails once the cap is reached.
    pub fn with_size_limit(mut self, limit: usize) -> Self {
        self.size_limit = limit;
        self
    }

    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set how many instances are created up front
    ///
    /// # Examples
    ///
    /// ```
    /// use shardpool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::<i32>::new().with_initial_size(50);
    /// assert_eq!(config.initial_size, 50);
    /// ```
    pub fn with_initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }

    /// Enable auto-tuning with the given tick interval and factor.
    pub fn with_auto_tune(mut self, interval: Duration, factor: f64) -> Self {
        self.auto_tune = true;
        self.auto_tune_interval = interval;
        self.auto_tune_factor = factor;
        self
    }

    /// Use a size-dependent auto-tune factor instead of a static one.
    pub fn with_dynamic_auto_tune_factor<F>(mut self, factor: F) -> Self
    where
        F: Fn(usize) -> f64 + Send + Sync + 'static,
    {
        self.auto_tune_dynamic_factor = Some(Arc::new(factor));
        self
    }

    /// Enable the hot-instance cache with the given capacity.
    pub fn with_caching(mut self, cache_max_size: usize) -> Self {
        self.enable_caching = true;
        self.cache_max_size = cache_max_size;
        self
    }

    /// Split the pool's storage into `shard_count` independent free-lists.
    pub fn with_sharding(mut self, shard_count: usize) -> Self {
        self.sharding_enabled = true;
        self.shard_count = shard_count;
        self
    }

    pub fn with_shard_strategy(mut self, strategy: Arc<dyn ShardingStrategy>) -> Self {
        self.shard_strategy = Some(strategy);
        self
    }

    /// Set time-to-live for idle bookkeeping entries
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_eviction_policy(mut self, policy: Arc<dyn EvictionPolicy>) -> Self {
        self.eviction_policy = Some(policy);
        self
    }

    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    pub fn with_on_get<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_get = Some(Arc::new(callback));
        self
    }

    pub fn with_on_put<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_put = Some(Arc::new(callback));
        self
    }

    pub fn with_on_evict<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_evict = Some(Arc::new(callback));
        self
    }

    pub fn with_on_auto_tune<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, usize) + Send + Sync + 'static,
    {
        self.on_auto_tune = Some(Arc::new(callback));
        self
    }

    pub fn with_on_create<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        self.on_create = Some(Arc::new(callback));
        self
    }

    pub fn with_on_destroy<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        self.on_destroy = Some(Arc::new(callback));
        self
    }

    pub fn with_on_reset<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        self.on_reset = Some(Arc::new(callback));
        self
    }

    pub fn with_on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &PoolError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Check the configuration invariants.
    ///
    /// Registration rejects configurations where `min_size <= initial_size
    /// <= max_size` does not hold, sharding is enabled with fewer than two
    /// shards, auto-tuning is enabled without a positive factor, or caching
    /// is enabled with a zero-capacity cache.
    pub fn validate(&self) -> Result<(), PoolErrorKind> {
        if self.min_size > self.max_size {
            return Err(PoolErrorKind::InvalidConfiguration(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.initial_size < self.min_size || self.initial_size > self.max_size {
            return Err(PoolErrorKind::InvalidConfiguration(format!(
                "initial_size ({}) must lie within [{}, {}]",
                self.initial_size, self.min_size, self.max_size
            )));
        }
        if self.sharding_enabled && self.shard_count < 2 {
            return Err(PoolErrorKind::InvalidConfiguration(format!(
                "sharding requires at least 2 shards, got {}",
                self.shard_count
            )));
        }
        if self.auto_tune
            && self.auto_tune_dynamic_factor.is_none()
            && self.auto_tune_factor <= 0.0
        {
            return Err(PoolErrorKind::InvalidConfiguration(format!(
                "auto-tune factor must be positive, got {}",
                self.auto_tune_factor
            )));
        }
        if self.enable_caching && self.cache_max_size == 0 {
            return Err(PoolErrorKind::InvalidConfiguration(
                "caching requires cache_max_size > 0".to_string(),
            ));
        }
        Ok(())
    }
}
