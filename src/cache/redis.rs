//! Redis-backed cache with connection pooling and SCAN-based pattern deletes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::Cache;
use crate::error::ServiceError;
use crate::models::ServiceHealth;

/// Production [`Cache`] over Redis.
///
/// Keys are stored under `{prefix}:{key}`. Pattern deletes iterate with SCAN
/// (cursor + COUNT) rather than KEYS so a large keyspace never stalls the
/// store.
pub struct RedisCache {
    conn: ConnectionManager,
    redis_url: String,
    key_prefix: String,
    default_ttl: Duration,
    operations: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl RedisCache {
    /// Connect and verify the connection with a PING.
    pub async fn connect(
        redis_url: &str,
        key_prefix: &str,
        default_ttl: Duration,
    ) -> Result<Self, ServiceError> {
        let client = redis::Client::open(redis_url).map_err(|e| ServiceError::Cache {
            operation: "connect",
            message: e.to_string(),
        })?;

        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| ServiceError::Cache {
                operation: "connect",
                message: e.to_string(),
            })?;

        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| ServiceError::Cache {
                operation: "connect",
                message: e.to_string(),
            })?;

        tracing::info!("Redis connection established");

        Ok(Self {
            conn,
            redis_url: redis_url.to_string(),
            key_prefix: key_prefix.to_string(),
            default_ttl,
            operations: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    fn cache_err(&self, operation: &'static str, e: impl std::fmt::Display) -> ServiceError {
        self.errors.fetch_add(1, Ordering::Relaxed);
        ServiceError::Cache {
            operation,
            message: e.to_string(),
        }
    }

    /// Connection URL with any credentials stripped, for health details.
    fn sanitized_url(&self) -> &str {
        match self.redis_url.split_once('@') {
            Some((_, host)) => host,
            None => &self.redis_url,
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, ServiceError> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let full_key = self.full_key(key);
        let mut conn = self.conn.clone();

        let raw: Option<Vec<u8>> = conn
            .get(&full_key)
            .await
            .map_err(|e| self.cache_err("get", e))?;

        let Some(raw) = raw else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        match serde_json::from_slice(&raw) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Err(e) => {
                // Corrupted entry: drop it and report a miss.
                tracing::warn!("Dropping corrupted cache entry {key}: {e}");
                let _: Result<(), _> = conn.del(&full_key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), ServiceError> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let full_key = self.full_key(key);
        let ttl_secs = ttl.unwrap_or(self.default_ttl).as_secs().max(1);

        let serialized =
            serde_json::to_vec(&value).map_err(|e| self.cache_err("set", e))?;

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(&full_key, serialized, ttl_secs)
            .await
            .map_err(|e| self.cache_err("set", e))
    }

    async fn delete(&self, key: &str) -> Result<(), ServiceError> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.full_key(key))
            .await
            .map_err(|e| self.cache_err("delete", e))
    }

    async fn clear_pattern(&self, pattern: &str) -> Result<u64, ServiceError> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let full_pattern = self.full_key(pattern);
        let mut conn = self.conn.clone();

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&full_pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| self.cache_err("clear_pattern", e))?;

            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        if keys.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.del(key);
        }
        let deleted: Vec<u64> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| self.cache_err("clear_pattern", e))?;

        Ok(deleted.into_iter().sum())
    }

    async fn health_check(&self) -> ServiceHealth {
        let probe_key = self.full_key("__health_check__");
        let started = Instant::now();
        let mut conn = self.conn.clone();

        let probe = async {
            conn.set_ex::<_, _, ()>(&probe_key, b"ok".as_slice(), 10).await?;
            let _: Option<Vec<u8>> = conn.get(&probe_key).await?;
            conn.del::<_, ()>(&probe_key).await?;
            Ok::<(), redis::RedisError>(())
        }
        .await;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let details = serde_json::json!({
            "redis_url": self.sanitized_url(),
            "total_operations": self.operations.load(Ordering::Relaxed),
            "cache_hits": self.hits.load(Ordering::Relaxed),
            "cache_misses": self.misses.load(Ordering::Relaxed),
            "total_errors": self.errors.load(Ordering::Relaxed),
            "key_prefix": self.key_prefix,
            "default_ttl": self.default_ttl.as_secs(),
        });

        match probe {
            Ok(()) => ServiceHealth::healthy("RedisCache", Some(latency_ms)).with_details(details),
            Err(e) => ServiceHealth::unhealthy("RedisCache", e.to_string()).with_details(details),
        }
    }
}
