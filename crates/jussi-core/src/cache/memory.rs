//! In-process cache tier.
//!
//! A capacity-bounded map behind a single `parking_lot::RwLock`: shared lock
//! on reads, exclusive on writes, critical sections bounded by a hash lookup.
//! Expired entries answer as misses on lookup and are reclaimed either by the
//! eviction pass that runs when the map is full or by an explicit
//! [`MemoryCache::purge_expired`] sweep.

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::trace;

use super::{Cache, CacheError};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// `None` means the entry never expires.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local cache tier with lazy expiry.
pub struct MemoryCache {
    entries: RwLock<AHashMap<String, Entry>>,
    max_entries: usize,
}

impl MemoryCache {
    /// Default capacity used by [`MemoryCache::default`].
    pub const DEFAULT_MAX_ENTRIES: usize = 50_000;

    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self { entries: RwLock::new(AHashMap::new()), max_entries: max_entries.max(1) }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Removes every expired entry; returns how many were reclaimed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    fn insert(&self, key: String, value: Value, ttl: Option<Duration>) {
        let now = Instant::now();
        let entry = Entry { value, expires_at: ttl.map(|d| now + d) };

        let mut entries = self.entries.write();
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            entries.retain(|_, e| !e.is_expired(now));
            if entries.len() >= self.max_entries {
                // Still full of live entries: drop the one closest to expiry
                // (an entry with no expiry is only evicted when nothing
                // expiring remains).
                let victim = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at.unwrap_or(now + Duration::from_secs(u32::MAX as u64)))
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    trace!(key = %victim, "memory cache full, evicting");
                    entries.remove(&victim);
                }
            }
        }
        entries.insert(key, entry);
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries.get(key).filter(|e| !e.is_expired(now)).map(|e| e.value.clone()))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Value>>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(keys
            .iter()
            .map(|key| entries.get(key).filter(|e| !e.is_expired(now)).map(|e| e.value.clone()))
            .collect())
    }

    async fn set(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.insert(key.to_owned(), value.clone(), ttl);
        Ok(())
    }

    async fn set_many(
        &self,
        entries: &[(String, Value)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        for (key, value) in entries {
            self.insert(key.clone(), value.clone(), ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.entries.write().clear();
        Ok(())
    }
}
