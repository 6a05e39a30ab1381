//! Shared rate-limit state backends
//!
//! The limiter treats its backing store as a plain key/value collaborator
//! with `get`/`set`-with-TTL semantics and builds its own optimistic
//! concurrency protocol on top. Two backends are provided:
//!
//! - [`RedisStore`]: the production backend, shared by all server instances
//! - [`MemoryStore`]: a process-local backend for development and tests

use crate::error::Result;
use crate::rate_limit::types::RateLimitRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Key/value contract consumed by the rate limiter.
///
/// No atomic compare-and-swap primitive is assumed; the limiter layers an
/// optimistic read-verify-write protocol over these two operations.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Fetch the record at `key`, if present.
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>>;

    /// Store `record` at `key`, expiring after `ttl_secs` seconds.
    async fn set(&self, key: &str, record: &RateLimitRecord, ttl_secs: u64) -> Result<()>;
}

/// Redis-backed store shared by all server instances
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at `url`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| crate::error::GateError::Config(format!("Invalid Redis URL: {}", e)))?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }

    /// Test the Redis connection
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(key).await?;

        match raw {
            Some(json) => match serde_json::from_str::<RateLimitRecord>(&json) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    // A value another version wrote, or a partial write.
                    // Treated the same as absent.
                    warn!(key, error = %e, "Discarding malformed rate limit record");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, record: &RateLimitRecord, ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(record)?;
        conn.set_ex::<_, _, ()>(key, json, ttl_secs.max(1)).await?;
        Ok(())
    }
}

/// In-memory store for local runs and tests
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredRecord>,
}

struct StoredRecord {
    record: RateLimitRecord,
    expires_at: Instant,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>> {
        // Clone out of the shard guard before any removal, which needs the
        // same shard's write lock
        let snapshot = self
            .entries
            .get(key)
            .map(|entry| (entry.record.clone(), entry.expires_at));

        match snapshot {
            Some((record, expires_at)) if expires_at > Instant::now() => Ok(Some(record)),
            Some(_) => {
                self.entries.remove(key);
                debug!(key, "Expired rate limit record removed on read");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, record: &RateLimitRecord, ttl_secs: u64) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredRecord {
                record: record.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs.max(1)),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(count: u32, reset_time: u64) -> RateLimitRecord {
        RateLimitRecord { count, reset_time }
    }

    #[tokio::test]
    async fn test_memory_store_set_and_get() {
        let store = MemoryStore::new();

        store
            .set("rate_limit:/store/reviews:1.2.3.4", &record(3, 90_000), 60)
            .await
            .unwrap();

        let fetched = store
            .get("rate_limit:/store/reviews:1.2.3.4")
            .await
            .unwrap()
            .expect("record should be present");
        assert_eq!(fetched.count, 3);
        assert_eq!(fetched.reset_time, 90_000);
    }

    #[tokio::test]
    async fn test_memory_store_absent_key() {
        let store = MemoryStore::new();
        assert!(store.get("rate_limit:missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_overwrite() {
        let store = MemoryStore::new();

        store.set("k", &record(1, 1_000), 60).await.unwrap();
        store.set("k", &record(2, 1_000), 60).await.unwrap();

        let fetched = store.get("k").await.unwrap().unwrap();
        assert_eq!(fetched.count, 2);
        assert_eq!(store.len(), 1);
    }

    // Requires a running Redis instance. Run with: cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_redis_store_round_trip() {
        let store = RedisStore::connect("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");
        store.ping().await.expect("Redis ping failed");

        let key = format!("pharma-gate:test:{}", rand::random::<u32>());
        store.set(&key, &record(5, 120_000), 10).await.unwrap();

        let fetched = store.get(&key).await.unwrap().unwrap();
        assert_eq!(fetched.count, 5);
        assert_eq!(fetched.reset_time, 120_000);
    }
}
