//! In-process cache used when no Redis URL is configured, and in tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{key_matches, Cache};
use crate::error::ServiceError;
use crate::models::ServiceHealth;

struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// HashMap-backed [`Cache`] with per-entry deadlines.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    default_ttl: Duration,
}

impl MemoryCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Number of live (unexpired) entries. Test and health helper.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, ServiceError> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), ServiceError> {
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ServiceError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear_pattern(&self, pattern: &str) -> Result<u64, ServiceError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key_matches(key, pattern));
        Ok((before - entries.len()) as u64)
    }

    async fn health_check(&self) -> ServiceHealth {
        ServiceHealth::healthy("MemoryCache", Some(0.0)).with_details(serde_json::json!({
            "entries": self.len().await,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::default();
        cache
            .set("a:b", serde_json::json!({"x": 1}), None)
            .await
            .unwrap();

        assert_eq!(
            cache.get("a:b").await.unwrap(),
            Some(serde_json::json!({"x": 1}))
        );

        cache.delete("a:b").await.unwrap();
        assert_eq!(cache.get("a:b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::default();
        cache
            .set("gone", serde_json::json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_pattern() {
        let cache = MemoryCache::default();
        for key in ["svc:lb:1:10", "svc:lb:1:20", "svc:bal:1:2"] {
            cache.set(key, serde_json::json!(1), None).await.unwrap();
        }

        let removed = cache.clear_pattern("svc:lb:1:*").await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get("svc:bal:1:2").await.unwrap().is_some());
    }
}
