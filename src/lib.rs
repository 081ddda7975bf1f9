//! # shardpool
//!
//! A concurrent registry of named object pools with automatic sharding,
//! hot-instance caching, adaptive sizing, and pluggable eviction.
//!
//! ## Features
//!
//! - Named pools of any type implementing [`PoolAble`], registered and
//!   borrowed through one [`PoolManager`]
//! - Lock-free per-shard free-lists with round-robin, random, hash, or
//!   user-supplied routing
//! - Bounded hot-instance cache consulted before the free-lists
//! - Background auto-tuner resizing pools toward observed load
//! - Background evictor with TTL, LRU, LFU, or combined policies
//! - Per-pool atomic metrics with Prometheus text export
//! - Lifecycle hooks for every pool event
//!
//! ## Quick Start
//!
//! ```rust
//! use shardpool::{PoolAble, PoolConfiguration, PoolManager};
//!
//! #[derive(Default)]
//! struct Connection {
//!     buffer: Vec<u8>,
//! }
//!
//! impl PoolAble for Connection {
//!     fn reset(&mut self) {
//!         self.buffer.clear();
//!     }
//! }
//!
//! let manager = PoolManager::new();
//! manager
//!     .add_pool(
//!         "connections",
//!         Connection::default,
//!         PoolConfiguration::new().with_initial_size(2),
//!     )
//!     .unwrap();
//!
//! let conn = manager.acquire_instance("connections").unwrap();
//! // ... use the connection ...
//! manager.release_instance("connections", conn).unwrap();
//! ```

mod background;
mod cache;
mod config;
mod errors;
mod eviction;
mod manager;
mod metadata;
mod metrics;
mod shard;
mod sharding;

pub use config::{
    DynamicFactor, ErrorCallback, InstanceCallback, PoolCallback, PoolConfiguration,
    ResizeCallback,
};
pub use errors::{PoolError, PoolErrorKind, PoolResult};
pub use eviction::{EvictionPolicy, LfuEviction, LruEviction, SmartEviction, TtlEviction};
pub use manager::{PoolAble, PoolManager};
pub use metadata::{ItemMetadata, ItemStatus};
pub use metrics::{MetricsExporter, PoolMetrics};
pub use sharding::{
    FnSharding, HashSharding, RandomSharding, RoundRobinSharding, ShardingStrategy,
};
