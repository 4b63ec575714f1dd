//! Two-tier cache coordination.
//!
//! Reads probe the local tier first; a remote hit is promoted into the local
//! tier (without expiration) before being returned. Remote read failures are
//! swallowed and treated as misses so an unavailable Redis never shows up in
//! the request path. Writes go through to both tiers; a failure in one tier
//! does not prevent the other, and the first failure is surfaced for the
//! caller to log.

use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::debug;

use super::{Cache, CacheError, MemoryCache};

/// Local tier plus optional shared remote tier.
pub struct CacheGroup {
    local: MemoryCache,
    remote: Option<Arc<dyn Cache>>,
}

impl CacheGroup {
    #[must_use]
    pub fn new(local: MemoryCache, remote: Option<Arc<dyn Cache>>) -> Self {
        Self { local, remote }
    }

    /// A memory-only group, used when no remote tier is configured.
    #[must_use]
    pub fn local_only(local: MemoryCache) -> Self {
        Self::new(local, None)
    }

    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    #[must_use]
    pub fn local(&self) -> &MemoryCache {
        &self.local
    }

    /// Looks up `key`, promoting a remote hit into the local tier.
    ///
    /// Never fails: local reads are infallible and remote failures read as
    /// misses.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Ok(Some(value)) = self.local.get(key).await {
            return Some(value);
        }

        let remote = self.remote.as_ref()?;
        match remote.get(key).await {
            Ok(Some(value)) => {
                // Promote without expiration; the remote tier owns the TTL.
                let _ = self.local.set(key, &value, None).await;
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                debug!(key, error = %e, "remote cache read failed, treating as miss");
                None
            }
        }
    }

    /// Multi-key lookup aligned with `keys`; remote is only consulted for the
    /// indices that missed locally, and each remote hit is promoted.
    pub async fn mget(&self, keys: &[String]) -> Vec<Option<Value>> {
        let mut results = self
            .local
            .mget(keys)
            .await
            .unwrap_or_else(|_| vec![None; keys.len()]);

        let Some(remote) = self.remote.as_ref() else {
            return results;
        };

        let missing: Vec<(usize, String)> = results
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_none())
            .map(|(i, _)| (i, keys[i].clone()))
            .collect();
        if missing.is_empty() {
            return results;
        }

        let missing_keys: Vec<String> = missing.iter().map(|(_, k)| k.clone()).collect();
        match remote.mget(&missing_keys).await {
            Ok(remote_results) => {
                for ((index, key), value) in missing.into_iter().zip(remote_results) {
                    if let Some(value) = value {
                        let _ = self.local.set(&key, &value, None).await;
                        results[index] = Some(value);
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "remote cache mget failed, treating as misses");
            }
        }

        results
    }

    /// Writes `key` to both tiers. `ttl` of `None` means no expiry.
    ///
    /// # Errors
    ///
    /// Surfaces the first tier failure after attempting both tiers.
    pub async fn set(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let local_result = self.local.set(key, value, ttl).await;
        let remote_result = match self.remote.as_ref() {
            Some(remote) => remote.set(key, value, ttl).await,
            None => Ok(()),
        };
        local_result.and(remote_result)
    }

    /// Writes several entries to both tiers under one TTL.
    ///
    /// # Errors
    ///
    /// Surfaces the first tier failure after attempting both tiers.
    pub async fn set_many(
        &self,
        entries: &[(String, Value)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let local_result = self.local.set_many(entries, ttl).await;
        let remote_result = match self.remote.as_ref() {
            Some(remote) => remote.set_many(entries, ttl).await,
            None => Ok(()),
        };
        local_result.and(remote_result)
    }

    /// Deletes `key` from both tiers.
    ///
    /// # Errors
    ///
    /// Surfaces the first tier failure after attempting both tiers.
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let local_result = self.local.delete(key).await;
        let remote_result = match self.remote.as_ref() {
            Some(remote) => remote.delete(key).await,
            None => Ok(()),
        };
        local_result.and(remote_result)
    }

    /// Clears both tiers.
    ///
    /// # Errors
    ///
    /// Surfaces the first tier failure after attempting both tiers.
    pub async fn clear(&self) -> Result<(), CacheError> {
        let local_result = self.local.clear().await;
        let remote_result = match self.remote.as_ref() {
            Some(remote) => remote.clear().await,
            None => Ok(()),
        };
        local_result.and(remote_result)
    }

    /// Closes both tiers.
    ///
    /// # Errors
    ///
    /// Surfaces the first tier failure after attempting both tiers.
    pub async fn close(&self) -> Result<(), CacheError> {
        let local_result = self.local.close().await;
        let remote_result = match self.remote.as_ref() {
            Some(remote) => remote.close().await,
            None => Ok(()),
        };
        local_result.and(remote_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// A remote tier that always fails, for exercising the swallow paths.
    struct BrokenRemote;

    #[async_trait]
    impl Cache for BrokenRemote {
        async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
            Err(broken())
        }
        async fn mget(&self, _keys: &[String]) -> Result<Vec<Option<Value>>, CacheError> {
            Err(broken())
        }
        async fn set(
            &self,
            _key: &str,
            _value: &Value,
            _ttl: Option<Duration>,
        ) -> Result<(), CacheError> {
            Err(broken())
        }
        async fn set_many(
            &self,
            _entries: &[(String, Value)],
            _ttl: Option<Duration>,
        ) -> Result<(), CacheError> {
            Err(broken())
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(broken())
        }
        async fn clear(&self) -> Result<(), CacheError> {
            Err(broken())
        }
        async fn close(&self) -> Result<(), CacheError> {
            Err(broken())
        }
    }

    fn broken() -> CacheError {
        CacheError::Remote(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "remote tier unavailable",
        )))
    }

    fn group_with_memory_remote() -> (CacheGroup, Arc<MemoryCache>) {
        let remote = Arc::new(MemoryCache::default());
        let group = CacheGroup::new(MemoryCache::default(), Some(remote.clone()));
        (group, remote)
    }

    #[tokio::test]
    async fn set_writes_through_both_tiers() {
        let (group, remote) = group_with_memory_remote();
        group.set("k", &json!({"result": 1}), Some(Duration::from_secs(30))).await.unwrap();

        assert_eq!(group.local().get("k").await.unwrap(), Some(json!({"result": 1})));
        assert_eq!(remote.get("k").await.unwrap(), Some(json!({"result": 1})));
    }

    #[tokio::test]
    async fn remote_hit_promotes_to_local() {
        let (group, remote) = group_with_memory_remote();
        remote.set("k", &json!("remote-value"), None).await.unwrap();

        assert!(group.local().get("k").await.unwrap().is_none());
        assert_eq!(group.get("k").await, Some(json!("remote-value")));

        // Promoted: a second read is served locally even after the remote
        // loses the key.
        remote.delete("k").await.unwrap();
        assert_eq!(group.get("k").await, Some(json!("remote-value")));
    }

    #[tokio::test]
    async fn mget_fills_only_missing_indices_from_remote() {
        let (group, remote) = group_with_memory_remote();
        group.local().set("a", &json!("local-a"), None).await.unwrap();
        remote.set("b", &json!("remote-b"), None).await.unwrap();

        let results = group
            .mget(&["a".to_owned(), "b".to_owned(), "c".to_owned()])
            .await;
        assert_eq!(results, vec![Some(json!("local-a")), Some(json!("remote-b")), None]);

        // "b" was promoted.
        assert_eq!(group.local().get("b").await.unwrap(), Some(json!("remote-b")));
    }

    #[tokio::test]
    async fn broken_remote_reads_as_miss() {
        let group = CacheGroup::new(MemoryCache::default(), Some(Arc::new(BrokenRemote)));
        assert_eq!(group.get("k").await, None);
        assert_eq!(group.mget(&["k".to_owned()]).await, vec![None]);
    }

    #[tokio::test]
    async fn broken_remote_write_surfaces_error_but_local_sticks() {
        let group = CacheGroup::new(MemoryCache::default(), Some(Arc::new(BrokenRemote)));
        let err = group.set("k", &json!(1), None).await.unwrap_err();
        assert!(matches!(err, CacheError::Remote(_)));

        // The local tier took the write regardless.
        assert_eq!(group.local().get("k").await.unwrap(), Some(json!(1)));
        assert_eq!(group.get("k").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn local_only_group_round_trips() {
        let group = CacheGroup::local_only(MemoryCache::default());
        group.set("k", &json!(42), Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(group.get("k").await, Some(json!(42)));

        group.delete("k").await.unwrap();
        assert_eq!(group.get("k").await, None);
    }

    #[tokio::test]
    async fn delete_removes_from_both_tiers() {
        let (group, remote) = group_with_memory_remote();
        group.set("k", &json!(1), None).await.unwrap();
        group.delete("k").await.unwrap();

        assert_eq!(group.get("k").await, None);
        assert_eq!(remote.get("k").await.unwrap(), None);
    }
}
