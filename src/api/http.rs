//! Reqwest-backed API client with automatic retry for transient errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{classify_response, ApiClient, ApiResponse, HttpMethod, RequestOptions};
use crate::config::RetryConfig;
use crate::error::ServiceError;
use crate::models::ServiceHealth;

/// Default per-request timeout when the caller does not override it.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Backend API client with bearer auth, bounded pool, and retry/backoff.
pub struct HttpApiClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    retry: RetryConfig,
    requests: AtomicU64,
    errors: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl HttpApiClient {
    /// Create a new client against `base_url` with default retry settings.
    pub fn new(base_url: &str, api_token: &str) -> Self {
        Self::with_retry(base_url, api_token, RetryConfig::default(), 10)
    }

    /// Create a new client with an explicit retry policy and pool bound.
    pub fn with_retry(
        base_url: &str,
        api_token: &str,
        retry: RetryConfig,
        max_connections: usize,
    ) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(max_connections)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            retry,
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
        }
    }

    /// Parse a Retry-After header value as whole seconds.
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
    }

    /// Execute a single request without retry.
    async fn execute_request(
        &self,
        method: HttpMethod,
        path: &str,
        options: &RequestOptions,
    ) -> Result<ApiResponse, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = match method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };

        builder = builder
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Content-Type", "application/json")
            .timeout(options.timeout.unwrap_or(DEFAULT_TIMEOUT));

        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(body) = &options.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                return Err(if e.is_timeout() {
                    ServiceError::Network(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    ServiceError::Network(format!("connection failed: {e}"))
                } else {
                    ServiceError::Network(format!("request failed: {e}"))
                });
            }
        };

        let status = response.status().as_u16();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();

        if status == 429 {
            return Err(ServiceError::RateLimited { retry_after });
        }

        classify_response(status, body)
    }

    fn record_latency(&self, started: Instant) {
        self.total_latency_ms
            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ServiceError> {
        let started = Instant::now();
        self.requests.fetch_add(1, Ordering::Relaxed);

        let mut attempt: u32 = 0;
        loop {
            match self.execute_request(method, path, &options).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(
                            "{method} {path} succeeded after {attempt} retries ({:?})",
                            started.elapsed()
                        );
                    }
                    self.record_latency(started);
                    return Ok(response);
                }
                Err(error) => {
                    if error.is_retriable() && attempt < self.retry.max_retries {
                        let delay = error
                            .suggested_delay()
                            .unwrap_or_else(|| self.retry.delay_for_attempt(attempt));
                        tracing::warn!(
                            "{method} {path} failed (attempt {}), retrying in {delay:?}: {error}",
                            attempt + 1
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    } else {
                        self.errors.fetch_add(1, Ordering::Relaxed);
                        self.record_latency(started);
                        if attempt > 0 {
                            tracing::error!(
                                "{method} {path} failed after {attempt} retries: {error}"
                            );
                        }
                        return Err(error);
                    }
                }
            }
        }
    }

    async fn health_check(&self) -> ServiceHealth {
        let started = Instant::now();
        let result = self
            .execute_request(
                HttpMethod::Get,
                "/health",
                &RequestOptions::new().timeout(Duration::from_secs(5)),
            )
            .await;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let details = serde_json::json!({
            "total_requests": self.requests.load(Ordering::Relaxed),
            "total_errors": self.errors.load(Ordering::Relaxed),
            "total_latency_ms": self.total_latency_ms.load(Ordering::Relaxed),
        });

        match result {
            Ok(_) => {
                ServiceHealth::healthy("APIClient", Some(latency_ms)).with_details(details)
            }
            Err(e) => ServiceHealth::unhealthy("APIClient", e.to_string()).with_details(details),
        }
    }

    async fn close(&self) {
        // reqwest pools close on drop; nothing to release eagerly.
    }
}
