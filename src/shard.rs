//! Per-pool storage: one or more lock-free free-lists

use crossbeam::queue::SegQueue;

/// Storage for a single named pool. A non-sharded pool is a `ShardStore` with
/// exactly one shard; routing layers above never special-case it.
#[derive(Debug)]
pub(crate) struct ShardStore<T> {
    shards: Vec<SegQueue<T>>,
}

impl<T> ShardStore<T> {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| SegQueue::new()).collect(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn push(&self, shard_index: usize, value: T) {
        self.shards[shard_index % self.shards.len()].push(value);
    }

    pub fn pop(&self, shard_index: usize) -> Option<T> {
        self.shards[shard_index % self.shards.len()].pop()
    }

    pub fn shard_len(&self, shard_index: usize) -> usize {
        self.shards
            .get(shard_index)
            .map(SegQueue::len)
            .unwrap_or(0)
    }

    pub fn total_len(&self) -> usize {
        self.shards.iter().map(SegQueue::len).sum()
    }
}
