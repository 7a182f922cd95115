//! # guildforge
//!
//! Bot-side service layer and schedulers for a Discord community automation
//! platform.
//!
//! The bot process sits between Discord and a backend HTTP API:
//!
//! ```text
//! Discord event ──> View handler ──> Economy service ──> API client ──> backend API
//!                                         │
//!                                       cache
//!
//! timer ──> Scheduler ──> API (due jobs) ──> delay to fire-at ──> Discord REST ──> API (mark done)
//! ```
//!
//! ## Modules
//! - `api`: authenticated HTTP transport with retry/backoff and health probes
//! - `cache`: keyed TTL cache (Redis in production, in-process fallback)
//! - `services`: bytes economy, squads, and streak logic over the API
//! - `schedulers`: challenge/quest/message/Advent-of-Code posting loops
//! - `discord`: the minimal Discord REST surface the schedulers consume
//! - `views`: Discord-agnostic rendering of service results
//! - `config`: environment configuration
//! - `error`: the service error taxonomy

pub mod api;
pub mod cache;
pub mod config;
pub mod discord;
pub mod error;
pub mod models;
pub mod schedulers;
pub mod services;
pub mod util;
pub mod views;

pub use config::Config;
pub use error::ServiceError;
