//! Configuration management for guildforge.
//!
//! Configuration is read from environment variables:
//! - `API_BASE_URL` - Required. Base URL of the backend HTTP API.
//! - `API_BOT_TOKEN` - Required. Bearer token for backend API requests.
//! - `DISCORD_BOT_TOKEN` - Required. Bot token for Discord REST calls.
//! - `CACHE_URL` - Optional. Redis connection URL. When unset, an in-process
//!   cache is used instead.
//! - `CACHE_KEY_PREFIX` - Optional. Prefix for all cache keys. Defaults to `bot`.
//! - `CACHE_DEFAULT_TTL` - Optional. Fallback TTL in seconds. Defaults to `300`.
//! - `API_MAX_RETRIES` - Optional. Retry attempts for transient API failures. Defaults to `3`.
//! - `API_BASE_DELAY_MS` - Optional. First retry delay in milliseconds. Defaults to `500`.
//! - `API_MAX_DELAY_MS` - Optional. Retry delay cap in milliseconds. Defaults to `30000`.
//! - `API_BACKOFF_FACTOR` - Optional. Delay multiplier per attempt. Defaults to `2.0`.
//! - `API_POOL_MAX_CONNECTIONS` - Optional. Connection pool bound. Defaults to `10`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Retry policy for the backend API client.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts for transient failures.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied to the computed delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay for retry attempt `n` (0-based): `min(base * factor^n, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis connection URL. None means in-process cache.
    pub url: Option<String>,
    /// Prefix prepended before the service-name segment of every key.
    pub key_prefix: String,
    /// Fallback TTL when a call omits one.
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: "bot".to_string(),
            default_ttl: Duration::from_secs(300),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the backend HTTP API.
    pub api_base_url: String,

    /// Bearer token placed in the `Authorization` header of API requests.
    pub api_token: String,

    /// Discord bot token for REST calls.
    pub discord_token: String,

    /// Cache settings.
    pub cache: CacheConfig,

    /// API retry policy.
    pub retry: RetryConfig,

    /// Maximum connections kept in the API client pool.
    pub pool_max_connections: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` when a required variable is not
    /// set, or `ConfigError::InvalidValue` when a numeric variable fails to
    /// parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url = require("API_BASE_URL")?;
        let api_token = require("API_BOT_TOKEN")?;
        let discord_token = require("DISCORD_BOT_TOKEN")?;

        let cache = CacheConfig {
            url: std::env::var("CACHE_URL").ok(),
            key_prefix: std::env::var("CACHE_KEY_PREFIX").unwrap_or_else(|_| "bot".to_string()),
            default_ttl: Duration::from_secs(parse_or("CACHE_DEFAULT_TTL", 300)?),
        };

        let retry = RetryConfig {
            max_retries: parse_or("API_MAX_RETRIES", 3)?,
            base_delay: Duration::from_millis(parse_or("API_BASE_DELAY_MS", 500)?),
            max_delay: Duration::from_millis(parse_or("API_MAX_DELAY_MS", 30_000)?),
            backoff_factor: parse_or("API_BACKOFF_FACTOR", 2.0)?,
        };

        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            api_token,
            discord_token,
            cache,
            retry,
            pool_max_connections: parse_or("API_POOL_MAX_CONNECTIONS", 10)?,
        })
    }
}

fn require(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_growth_and_cap() {
        let retry = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        };

        assert_eq!(retry.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(4));
        // 2^4 = 16s exceeds the cap
        assert_eq!(retry.delay_for_attempt(4), Duration::from_secs(10));
    }

    #[test]
    fn test_default_cache_config() {
        let cache = CacheConfig::default();
        assert!(cache.url.is_none());
        assert_eq!(cache.key_prefix, "bot");
        assert_eq!(cache.default_ttl, Duration::from_secs(300));
    }
}
