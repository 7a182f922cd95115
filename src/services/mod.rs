//! Service layer: common scaffolding plus the economy and squad services.
//!
//! Every concrete service owns a [`ServiceCore`] for lifecycle, health
//! aggregation, and cache access. Cache failures are logged and treated as
//! misses so they never mask a successful API call.

pub mod bytes;
pub mod squads;
pub mod streak;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api::ApiClient;
use crate::cache::Cache;
use crate::error::ServiceError;
use crate::models::ServiceHealth;

/// Shared state and helpers for all concrete services.
pub struct ServiceCore {
    api: Arc<dyn ApiClient>,
    cache: Option<Arc<dyn Cache>>,
    name: &'static str,
    initialized: AtomicBool,
}

impl ServiceCore {
    pub fn new(api: Arc<dyn ApiClient>, cache: Option<Arc<dyn Cache>>, name: &'static str) -> Self {
        Self {
            api,
            cache,
            name,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn api(&self) -> &Arc<dyn ApiClient> {
        &self.api
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    /// Mark the service ready for use. Idempotent.
    pub fn initialize(&self) -> Result<(), ServiceError> {
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!("Service {} initialized", self.name);
        Ok(())
    }

    /// Close the API client. Always clears the initialized flag.
    pub async fn cleanup(&self) {
        self.api.close().await;
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!("Service {} cleaned up", self.name);
    }

    /// Fail fast when a method runs before `initialize()`.
    pub fn ensure_initialized(&self) -> Result<(), ServiceError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServiceError::NotInitialized(self.name))
        }
    }

    /// Aggregate health: unhealthy when uninitialized or any dependency is
    /// unhealthy; response time is the max of dependency latencies.
    pub async fn health_check(&self) -> ServiceHealth {
        if !self.initialized.load(Ordering::SeqCst) {
            return ServiceHealth::unhealthy(self.name, "Service not initialized");
        }

        let api_health = self.api.health_check().await;
        if !api_health.is_healthy {
            return ServiceHealth::unhealthy(self.name, "API client unhealthy").with_details(
                serde_json::json!({ "api_details": api_health.details }),
            );
        }

        let mut response_time = api_health.response_time_ms;
        let mut cache_healthy = true;

        if let Some(cache) = &self.cache {
            let cache_health = cache.health_check().await;
            cache_healthy = cache_health.is_healthy;
            response_time = match (response_time, cache_health.response_time_ms) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }

        ServiceHealth {
            service_name: self.name.to_string(),
            is_healthy: cache_healthy,
            response_time_ms: response_time,
            last_check: chrono::Utc::now(),
            details: serde_json::json!({
                "api_healthy": api_health.is_healthy,
                "cache_healthy": cache_healthy,
                "cache_enabled": self.has_cache(),
            }),
        }
    }

    /// `{service.lowercase}:{part1}:{part2}:...`
    pub fn cache_key(&self, parts: &[&str]) -> String {
        format!("{}:{}", self.name.to_lowercase(), parts.join(":"))
    }

    /// Cache read that swallows failures and decode errors.
    pub async fn get_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    tracing::warn!("Corrupted cache data for key {key}: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Cache get failed for key {key}: {e}");
                None
            }
        }
    }

    /// Cache write that swallows failures.
    pub async fn set_cached<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        match serde_json::to_value(value) {
            Ok(json) => {
                if let Err(e) = cache.set(key, json, Some(ttl)).await {
                    tracing::warn!("Cache set failed for key {key}: {e}");
                }
            }
            Err(e) => tracing::warn!("Cache serialization failed for key {key}: {e}"),
        }
    }

    /// Cache invalidation that swallows failures.
    pub async fn invalidate(&self, key: &str) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Err(e) = cache.delete(key).await {
            tracing::warn!("Cache invalidation failed for key {key}: {e}");
        }
    }

    /// Pattern invalidation that swallows failures, returning the count.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let Some(cache) = self.cache.as_ref() else {
            return 0;
        };
        match cache.clear_pattern(pattern).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("Cache pattern invalidation failed for {pattern}: {e}");
                0
            }
        }
    }
}
