//! Two-tier response cache.
//!
//! A fast in-process tier ([`memory::MemoryCache`]) in front of an optional
//! shared Redis tier ([`redis_backend::RedisCache`]), coordinated by
//! [`group::CacheGroup`]: reads probe local first and promote remote hits,
//! writes go through to both tiers. The [`ttl`] module maps configured TTL
//! codes (including the irreversibility-conditional code) to concrete write
//! policies, fed by the [`block`] watermark tracker.

pub mod block;
pub mod group;
pub mod memory;
pub mod redis_backend;
pub mod ttl;

pub use block::BlockTracker;
pub use group::CacheGroup;
pub use memory::MemoryCache;
pub use redis_backend::RedisCache;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Failures from a cache tier.
///
/// Read-path failures of the remote tier are swallowed by the group and
/// treated as misses; write-path failures are surfaced to the caller, which
/// logs and ignores them.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("remote cache error: {0}")]
    Remote(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A single cache tier.
///
/// `ttl` of `None` means the entry never expires.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Returns a sequence aligned with `keys`: `None` at every miss.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Value>>, CacheError>;

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>)
        -> Result<(), CacheError>;

    async fn set_many(
        &self,
        entries: &[(String, Value)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    async fn close(&self) -> Result<(), CacheError>;
}
