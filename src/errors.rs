//! Error types for the pool registry

use thiserror::Error;

/// The specific failure behind a [`PoolError`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolErrorKind {
    #[error("pool already exists")]
    PoolAlreadyExists,

    #[error("pool does not exist")]
    PoolNotFound,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("pool storage does not match sharding configuration: {0}")]
    InvalidShardState(String),

    #[error("size limit of {limit} outstanding instances reached")]
    SizeLimitReached { limit: usize },

    #[error("no metadata recorded for key {key:?}")]
    ItemNotFound { key: String },
}

/// A pool-scoped error: which pool, which operation, and what went wrong.
///
/// # Examples
///
/// ```
/// use shardpool::{PoolError, PoolErrorKind};
///
/// let err = PoolError::new("connections", "get", PoolErrorKind::PoolNotFound);
/// assert_eq!(err.pool(), "connections");
/// assert_eq!(*err.kind(), PoolErrorKind::PoolNotFound);
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("pool {pool:?}: {operation} failed: {kind}")]
pub struct PoolError {
    pool: String,
    operation: &'static str,
    kind: PoolErrorKind,
}

impl PoolError {
    pub fn new(pool: impl Into<String>, operation: &'static str, kind: PoolErrorKind) -> Self {
        Self {
            pool: pool.into(),
            operation,
            kind,
        }
    }

    /// Name of the pool the failing operation targeted.
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// The operation that failed ("add", "get", "put", "evict", ...).
    pub fn operation(&self) -> &str {
        self.operation
    }

    pub fn kind(&self) -> &PoolErrorKind {
        &self.kind
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
