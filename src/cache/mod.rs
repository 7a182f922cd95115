//! Keyed cache with per-entry TTL and pattern-based bulk deletion.
//!
//! Services treat the cache as optional and never let its failures mask a
//! successful API call. Values are stored as JSON; an entry that fails to
//! decode is deleted and treated as a miss.

mod memory;
mod redis;

pub use memory::MemoryCache;
pub use redis::RedisCache;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::models::ServiceHealth;

/// Key-value cache capability consumed by the service layer.
///
/// Keyspace is namespaced `{prefix}:{service}:{...}` by the callers; pattern
/// deletes use a single `*` suffix at the last segment.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a value. `None` on miss or corrupted entry.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, ServiceError>;

    /// Store a value for at most `ttl` (the backend default when `None`).
    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), ServiceError>;

    /// Remove one key.
    async fn delete(&self, key: &str) -> Result<(), ServiceError>;

    /// Remove all keys matching a glob pattern, returning the count removed.
    async fn clear_pattern(&self, pattern: &str) -> Result<u64, ServiceError>;

    /// Round-trip probe (set, get, delete) with observed latency and counters.
    async fn health_check(&self) -> ServiceHealth;

    /// Release backend resources.
    async fn close(&self) {}
}

/// Match a key against a glob pattern with a single trailing `*`.
pub(crate) fn key_matches(key: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_matches() {
        assert!(key_matches("bytesservice:leaderboard:1:10", "bytesservice:leaderboard:1:*"));
        assert!(key_matches("bytesservice:leaderboard:1:", "bytesservice:leaderboard:1:*"));
        assert!(!key_matches("bytesservice:balance:1:2", "bytesservice:leaderboard:1:*"));
        assert!(key_matches("exact:key", "exact:key"));
        assert!(!key_matches("exact:key:more", "exact:key"));
    }
}
