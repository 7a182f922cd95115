//! Discord-facing view layer: renders service results as responses.
//!
//! Views stay free of any gateway SDK; they produce plain data the frontend
//! turns into Discord interactions.

pub mod embeds;
pub mod transfer;
