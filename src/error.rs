//! Service error taxonomy with retry classification.
//!
//! One sum type covers every failure the service layer can surface. Transport
//! errors carry enough context to decide whether a retry is worthwhile;
//! domain errors carry the fields the Discord-facing layer needs to render a
//! user message.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by the service layer and its transports.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Input violated a precondition before any request was made.
    #[error("validation failed for {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// The remote API answered 404 for an entity lookup.
    #[error("{resource_type} not found: {resource_id}")]
    NotFound {
        resource_type: &'static str,
        resource_id: String,
    },

    /// The giver cannot cover the requested amount.
    #[error("insufficient balance for {operation}: required {required}, available {available}")]
    InsufficientBalance {
        required: i64,
        available: i64,
        operation: &'static str,
    },

    /// The daily reward was already claimed on the current civil day.
    #[error("daily reward already claimed today")]
    AlreadyClaimed {
        next_claim_at: Option<DateTime<Utc>>,
    },

    /// A squad operation required a membership the user does not have.
    #[error("user is not in any squad")]
    NotInSquad,

    /// The API reported an existing membership on join.
    #[error("user is already in squad {current}")]
    AlreadyInSquad { current: String },

    /// Target squad is at capacity.
    #[error("squad {squad} is full (capacity: {capacity})")]
    SquadFull { squad: String, capacity: u32 },

    /// Non-2xx HTTP response that maps to no more specific variant.
    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        body: Option<String>,
    },

    /// The request never produced a response (timeout, connect failure, DNS).
    #[error("network error: {0}")]
    Network(String),

    /// HTTP 429 from the API.
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Option<u64> },

    /// HTTP 401 from the API. Fatal for this process.
    #[error("authentication failed")]
    Authentication,

    /// A cache operation failed. Never escapes the service cache helpers.
    #[error("cache operation failed: {operation}: {message}")]
    Cache {
        operation: &'static str,
        message: String,
    },

    /// A service method was called before `initialize()`.
    #[error("service {0} is not initialized")]
    NotInitialized(&'static str),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unclassified failure with a sanitized message.
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether the API client should retry the request that produced this.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Delay to observe before the next attempt, when the server told us.
    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// HTTP status associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            Self::RateLimited { .. } => Some(429),
            Self::Authentication => Some(401),
            _ => None,
        }
    }

    /// Message safe to render in a Discord response.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { message, .. } => message.clone(),
            Self::NotFound { resource_type, .. } => {
                format!("{} not found.", capitalize(resource_type))
            }
            Self::InsufficientBalance {
                required, available, ..
            } => format!(
                "Insufficient balance! You need {required} bytes but only have {available}."
            ),
            Self::AlreadyClaimed { .. } => {
                "You've already claimed your daily bytes today!".to_string()
            }
            Self::NotInSquad => "You're not currently in any squad!".to_string(),
            Self::AlreadyInSquad { current } => {
                format!("You're already in the {current} squad!")
            }
            Self::SquadFull { squad, capacity } => {
                format!("The {squad} squad is full! (Maximum: {capacity} members)")
            }
            Self::Network(_) => {
                "Unable to connect to the server. Please try again later.".to_string()
            }
            Self::RateLimited { .. } => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            Self::Authentication => {
                "Authentication error. Please contact an administrator.".to_string()
            }
            Self::Cache { .. } => "Temporary service issue. Please try again.".to_string(),
            Self::Configuration(_) => {
                "Service configuration issue. Please contact an administrator.".to_string()
            }
            Self::Api { message, .. } => message.clone(),
            Self::NotInitialized(_) | Self::Internal(_) => {
                "Something went wrong. Please try again later.".to_string()
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Replace messages that could leak internals with a generic one.
///
/// Scans for credential-ish substrings and connection strings before an
/// unclassified error is wrapped into [`ServiceError::Internal`].
pub fn sanitize_error_message(raw: &str) -> String {
    const SENSITIVE: &[&str] = &[
        "password",
        "token",
        "secret",
        "key",
        "connection",
        "postgresql://",
        "mysql://",
        "mongodb://",
        "redis://",
        "localhost",
        "127.0.0.1",
        "::1",
        "host:",
        "port:",
        "user:",
        "auth",
        "credential",
    ];

    let lowered = raw.to_lowercase();
    if SENSITIVE.iter().any(|pat| lowered.contains(pat)) {
        "Service temporarily unavailable".to_string()
    } else {
        "Internal service error".to_string()
    }
}
