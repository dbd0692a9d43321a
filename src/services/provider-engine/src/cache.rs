//! Cache-aside storage for catalog lookups
//!
//! Country, service and price lists are read through a [`CacheStore`] with a
//! TTL. Values are stored as JSON text so both backends hold the same bytes.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::RedisConfig;
use crate::error::{EngineError, EngineResult};

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> EngineResult<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> EngineResult<()>;

    /// Remove every key starting with `prefix`; returns how many were removed
    async fn invalidate_prefix(&self, prefix: &str) -> EngineResult<u64>;
}

/// Return the cached value for `key`, or load, store and return it
///
/// Cache failures never fail the call: a broken cache degrades to loading.
pub async fn get_or_load<T, F, Fut>(
    store: &dyn CacheStore,
    key: &str,
    ttl: Duration,
    loader: F,
) -> EngineResult<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    match store.get(key).await {
        Ok(Some(cached)) => match serde_json::from_str(&cached) {
            Ok(value) => {
                debug!(key, "Cache hit");
                return Ok(value);
            }
            Err(e) => warn!(key, error = %e, "Discarding undecodable cache entry"),
        },
        Ok(None) => debug!(key, "Cache miss"),
        Err(e) => warn!(key, error = %e, "Cache read failed, loading directly"),
    }

    let value = loader().await?;
    match serde_json::to_string(&value) {
        Ok(serialized) => {
            if let Err(e) = store.set(key, serialized, ttl).await {
                warn!(key, error = %e, "Cache write failed");
            }
        }
        Err(e) => warn!(key, error = %e, "Cannot serialize value for cache"),
    }
    Ok(value)
}

/// Process-local cache
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .map(|entry| (entry.1 > now).then(|| entry.0.clone()));
        match hit {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> EngineResult<()> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> EngineResult<u64> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - self.entries.len()) as u64)
    }
}

/// Open a managed Redis connection
pub async fn connect_redis(config: &RedisConfig) -> EngineResult<ConnectionManager> {
    let client = redis::Client::open(config.url.as_str())
        .map_err(|e| EngineError::configuration(format!("Invalid Redis URL: {}", e)))?;
    let manager = ConnectionManager::new(client).await?;
    info!("Connected to Redis");
    Ok(manager)
}

/// Cache shared between engine instances
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisCache {
    pub fn new(connection: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.to_string(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}cache:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(self.full_key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> EngineResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .set_ex(self.full_key(key), value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> EngineResult<u64> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", self.full_key(prefix));
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let deleted: u64 = conn.del(&keys).await?;
                removed += deleted;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix, removed, "Invalidated cache keys");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_get_or_load_caches_within_ttl() {
        let cache = MemoryCache::new();
        let counter = AtomicUsize::new(0);
        let loads = &counter;
        let load = || async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<_, EngineError>(vec!["ru".to_string(), "kz".to_string()])
        };

        let first: Vec<String> = get_or_load(&cache, "countries:hub", Duration::from_secs(60), load)
            .await
            .unwrap();
        let second: Vec<String> = get_or_load(&cache, "countries:hub", Duration::from_secs(60), load)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_reload() {
        let cache = MemoryCache::new();
        cache
            .set("k", "1".to_string(), Duration::from_millis(0))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());

        let value: u32 = get_or_load(&cache, "k", Duration::from_secs(5), || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_loader_errors_are_not_cached() {
        let cache = MemoryCache::new();
        let result: EngineResult<u32> = get_or_load(&cache, "k", Duration::from_secs(5), || async {
            Err(EngineError::internal("boom"))
        })
        .await;
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("countries:a", "[]".into(), ttl).await.unwrap();
        cache.set("services:a", "[]".into(), ttl).await.unwrap();
        cache.set("countries:b", "[]".into(), ttl).await.unwrap();

        assert_eq!(cache.invalidate_prefix("countries:").await.unwrap(), 2);
        assert_eq!(cache.len(), 1);
    }
}
