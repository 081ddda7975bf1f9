//! Sharding strategies for routing operations to a pool's shards

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

/// Maps a pool name and routing key to a shard index.
///
/// Implementations must return an index in `0..shard_count`. The registry
/// never invokes a strategy with `shard_count <= 1`; single-shard pools are
/// routed directly.
pub trait ShardingStrategy: Send + Sync {
    fn shard_index(&self, pool: &str, shard_count: usize, key: &str) -> usize;
}

/// Adapter turning a plain closure into a [`ShardingStrategy`], so
/// pool-specific routing does not need a dedicated type.
///
/// ```
/// use shardpool::{FnSharding, ShardingStrategy};
///
/// let by_key_length = FnSharding(|_pool: &str, shard_count: usize, key: &str| {
///     key.len() % shard_count
/// });
/// assert_eq!(by_key_length.shard_index("p", 4, "abcde"), 1);
/// ```
pub struct FnSharding<F>(pub F);

impl<F> ShardingStrategy for FnSharding<F>
where
    F: Fn(&str, usize, &str) -> usize + Send + Sync,
{
    fn shard_index(&self, pool: &str, shard_count: usize, key: &str) -> usize {
        (self.0)(pool, shard_count, key)
    }
}

/// Cycles through shards with an atomic counter. Even long-run distribution,
/// no ordering guarantee across concurrent callers.
#[derive(Debug, Default)]
pub struct RoundRobinSharding {
    counter: AtomicU64,
}

impl RoundRobinSharding {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShardingStrategy for RoundRobinSharding {
    fn shard_index(&self, _pool: &str, shard_count: usize, _key: &str) -> usize {
        (self.counter.fetch_add(1, Ordering::Relaxed) as usize) % shard_count
    }
}

/// Picks a uniformly random shard from the thread-local generator.
#[derive(Debug, Default)]
pub struct RandomSharding;

impl RandomSharding {
    pub fn new() -> Self {
        Self
    }
}

impl ShardingStrategy for RandomSharding {
    fn shard_index(&self, _pool: &str, shard_count: usize, _key: &str) -> usize {
        rand::rng().random_range(0..shard_count)
    }
}

/// Routes by a stable FNV-1a hash of the pool name and key, so identical keys
/// always land on the same shard.
#[derive(Debug, Default)]
pub struct HashSharding;

impl HashSharding {
    pub fn new() -> Self {
        Self
    }
}

impl ShardingStrategy for HashSharding {
    fn shard_index(&self, pool: &str, shard_count: usize, key: &str) -> usize {
        let mut hash = fnv1a32(pool.as_bytes());
        hash = fnv1a32_continue(hash, key.as_bytes());
        (hash as usize) % shard_count
    }
}

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv1a32(bytes: &[u8]) -> u32 {
    fnv1a32_continue(FNV_OFFSET_BASIS, bytes)
}

fn fnv1a32_continue(mut hash: u32, bytes: &[u8]) -> u32 {
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
