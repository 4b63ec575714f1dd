//! Shared remote cache tier backed by Redis.
//!
//! Values are stored as JSON strings. The tier is strictly best-effort: a
//! value that fails to decode reads as a miss, never as an error, and the
//! connection manager reconnects in the background after outages.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::{Cache, CacheError};

/// Remote cache tier on a shared Redis instance.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Remote`] when the URL is invalid or the initial
    /// connection fails.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url, "connected to remote cache");
        Ok(Self { conn })
    }

    fn encode(value: &Value) -> Result<String, CacheError> {
        Ok(serde_json::to_string(value)?)
    }

    /// Decode failures are misses, not errors: a foreign writer may have put
    /// something unexpected under one of our keys.
    fn decode(key: &str, raw: Option<String>) -> Option<Value> {
        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "undecodable remote cache value treated as miss");
                None
            }
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        Ok(Self::decode(key, raw))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Value>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = conn.mget(keys).await?;
        Ok(keys
            .iter()
            .zip(raw)
            .map(|(key, value)| Self::decode(key, value))
            .collect())
    }

    async fn set(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let payload = Self::encode(value)?;
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, payload, ttl.as_secs().max(1)).await?,
            None => conn.set::<_, _, ()>(key, payload).await?,
        }
        Ok(())
    }

    async fn set_many(
        &self,
        entries: &[(String, Value)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            let payload = Self::encode(value)?;
            match ttl {
                Some(ttl) => {
                    pipe.set_ex(key, payload, ttl.as_secs().max(1));
                }
                None => {
                    pipe.set(key, payload);
                }
            }
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        // The connection manager has no explicit shutdown; dropping the last
        // clone closes the multiplexed connection.
        Ok(())
    }
}
