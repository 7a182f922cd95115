//! Backend API client: trait seam, response handling, and the HTTP transport.
//!
//! Services depend on the [`ApiClient`] trait so tests can script responses
//! without a network. The production implementation lives in [`http`].

mod http;

pub use http::HttpApiClient;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::ServiceError;
use crate::models::ServiceHealth;

/// HTTP method subset the backend API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Per-request options: query parameters, JSON body, timeout override.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A successful (2xx) API response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        serde_json::from_slice(&self.body).map_err(|e| ServiceError::Api {
            status: self.status,
            message: format!("failed to decode response body: {e}"),
            body: Some(String::from_utf8_lossy(&self.body).into_owned()),
        })
    }
}

/// Pull the human-readable `detail` out of an API error body.
///
/// The API returns `{"detail": "..."}` or, for wrapped errors,
/// `{"detail": {"detail": "..."}}`.
pub fn extract_error_detail(status: u16, body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        match value.get("detail") {
            Some(serde_json::Value::String(s)) => return s.clone(),
            Some(serde_json::Value::Object(inner)) => {
                if let Some(serde_json::Value::String(s)) = inner.get("detail") {
                    return s.clone();
                }
            }
            _ => {}
        }
    }
    format!("API error: {status}")
}

/// Map a raw status + body into the client contract.
///
/// 2xx passes through; everything else becomes a typed error. Shared by the
/// HTTP transport and the scripted test client so both honour one contract.
pub fn classify_response(status: u16, body: Vec<u8>) -> Result<ApiResponse, ServiceError> {
    match status {
        200..=299 => Ok(ApiResponse { status, body }),
        401 => Err(ServiceError::Authentication),
        429 => Err(ServiceError::RateLimited { retry_after: None }),
        _ => Err(ServiceError::Api {
            status,
            message: extract_error_detail(status, &body),
            body: Some(String::from_utf8_lossy(&body).into_owned()),
        }),
    }
}

/// Backend API transport.
///
/// Implementations issue authenticated JSON requests with a per-call timeout
/// and surface failures through the [`ServiceError`] taxonomy. 2xx responses
/// are `Ok`; non-2xx and transport failures are `Err`.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ServiceError>;

    /// Round-trip health probe with observed latency and client counters.
    async fn health_check(&self) -> ServiceHealth;

    /// Release transport resources.
    async fn close(&self) {}

    async fn get(&self, path: &str, options: RequestOptions) -> Result<ApiResponse, ServiceError> {
        self.request(HttpMethod::Get, path, options).await
    }

    async fn post(&self, path: &str, options: RequestOptions) -> Result<ApiResponse, ServiceError> {
        self.request(HttpMethod::Post, path, options).await
    }

    async fn put(&self, path: &str, options: RequestOptions) -> Result<ApiResponse, ServiceError> {
        self.request(HttpMethod::Put, path, options).await
    }

    async fn delete(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ServiceError> {
        self.request(HttpMethod::Delete, path, options).await
    }
}
