//! Minimum-interval rate limiting per provider
//!
//! A reservation hands out the next free slot and returns how long the caller
//! must wait for it. Reservation is atomic so two callers never share a slot:
//! in-process through the map's entry lock, across processes through a Lua
//! script evaluated by Redis.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::EngineResult;

/// `KEYS[1]` slot key, `ARGV[1]` interval in ms; returns the wait in ms
const RESERVE_SLOT_SCRIPT: &str = r#"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local interval = tonumber(ARGV[1])
local next_slot = tonumber(redis.call('GET', KEYS[1]) or '0')
if next_slot < now then
  next_slot = now
end
redis.call('SET', KEYS[1], next_slot + interval, 'PX', (next_slot - now) + interval + 1000)
return next_slot - now
"#;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Reserve the next slot for `key`; returns milliseconds to wait
    async fn reserve_slot(&self, key: &str, min_interval_ms: u64) -> EngineResult<u64>;
}

/// Reserve a slot and sleep until it arrives
///
/// Limiter failures are logged and the call proceeds unthrottled.
pub async fn acquire(limiter: &dyn RateLimiter, key: &str, min_interval_ms: u64) {
    if min_interval_ms == 0 {
        return;
    }
    match limiter.reserve_slot(key, min_interval_ms).await {
        Ok(0) => {}
        Ok(wait_ms) => {
            debug!(provider = key, wait_ms, "Waiting for rate limit slot");
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
        Err(e) => {
            warn!(provider = key, error = %e, "Rate limiter unavailable, proceeding without slot");
        }
    }
}

/// Single-node limiter
#[derive(Debug, Default)]
pub struct MemoryRateLimiter {
    next_slots: DashMap<String, Instant>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn reserve_slot(&self, key: &str, min_interval_ms: u64) -> EngineResult<u64> {
        let now = Instant::now();
        let interval = Duration::from_millis(min_interval_ms);

        let mut entry = self.next_slots.entry(key.to_string()).or_insert(now);
        let slot = (*entry).max(now);
        *entry = slot + interval;

        Ok(slot.duration_since(now).as_millis() as u64)
    }
}

/// Limiter shared by every process pointing at the same Redis
#[derive(Clone)]
pub struct RedisRateLimiter {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisRateLimiter {
    pub fn new(connection: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.to_string(),
        }
    }

    fn slot_key(&self, key: &str) -> String {
        format!("{}ratelimit:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn reserve_slot(&self, key: &str, min_interval_ms: u64) -> EngineResult<u64> {
        let mut conn = self.connection.clone();
        let wait: i64 = redis::Script::new(RESERVE_SLOT_SCRIPT)
            .key(self.slot_key(key))
            .arg(min_interval_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(wait.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[tokio::test]
    async fn test_memory_slots_are_spaced_by_interval() {
        let limiter = MemoryRateLimiter::new();
        assert_eq!(limiter.reserve_slot("hub", 200).await.unwrap(), 0);

        let second = limiter.reserve_slot("hub", 200).await.unwrap();
        assert!((150..=200).contains(&second), "second wait {}", second);

        let third = limiter.reserve_slot("hub", 200).await.unwrap();
        assert!((350..=400).contains(&third), "third wait {}", third);
    }

    #[tokio::test]
    async fn test_memory_slots_are_per_provider() {
        let limiter = MemoryRateLimiter::new();
        limiter.reserve_slot("a", 1000).await.unwrap();
        assert_eq!(limiter.reserve_slot("b", 1000).await.unwrap(), 0);
    }

    struct Broken;

    #[async_trait]
    impl RateLimiter for Broken {
        async fn reserve_slot(&self, _key: &str, _min_interval_ms: u64) -> EngineResult<u64> {
            Err(EngineError::internal("redis down"))
        }
    }

    #[tokio::test]
    async fn test_acquire_fails_open() {
        let started = Instant::now();
        acquire(&Broken, "p", 5000).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
