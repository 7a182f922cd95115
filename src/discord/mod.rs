//! Minimal Discord REST surface consumed by the schedulers and views.
//!
//! Only three calls are needed: send a channel message (optionally with
//! action buttons), create a forum post, and pin a message. The trait seam
//! keeps schedulers testable without a gateway connection.

mod rest;

pub use rest::HttpDiscordRest;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the Discord REST API.
#[derive(Debug, Error)]
pub enum DiscordError {
    /// Channel (or message) does not exist.
    #[error("channel not found: {0}")]
    NotFound(String),

    /// The bot lacks permission for the operation.
    #[error("no permission for channel {0}")]
    Forbidden(String),

    /// HTTP 429 with a tolerable retry-after.
    #[error("rate limited")]
    RateLimited { retry_after: Option<f64> },

    /// HTTP 429 with a retry-after beyond what we will wait for.
    #[error("rate limit too long ({retry_after}s)")]
    RateLimitTooLong { retry_after: f64 },

    /// 5xx from Discord.
    #[error("discord server error {status}: {message}")]
    Internal { status: u16, message: String },

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Channel id is not a snowflake.
    #[error("invalid channel id: {0}")]
    InvalidChannel(String),
}

impl DiscordError {
    /// Terminal errors skip the channel without further retries.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Forbidden(_) | Self::InvalidChannel(_)
        )
    }
}

/// Button style subset used by announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Primary,
    Success,
}

impl ButtonStyle {
    /// Discord wire value.
    pub fn code(self) -> u8 {
        match self {
            Self::Primary => 1,
            Self::Success => 3,
        }
    }
}

/// An interactive button attached to an announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionButton {
    pub style: ButtonStyle,
    pub custom_id: String,
    pub label: String,
    pub emoji: Option<String>,
}

impl ActionButton {
    pub fn primary(custom_id: impl Into<String>, label: impl Into<String>, emoji: &str) -> Self {
        Self {
            style: ButtonStyle::Primary,
            custom_id: custom_id.into(),
            label: label.into(),
            emoji: Some(emoji.to_string()),
        }
    }

    pub fn success(custom_id: impl Into<String>, label: impl Into<String>, emoji: &str) -> Self {
        Self {
            style: ButtonStyle::Success,
            custom_id: custom_id.into(),
            label: label.into(),
            emoji: Some(emoji.to_string()),
        }
    }
}

/// Reference to a created message or forum thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    pub channel_id: String,
}

/// Discord REST operations the core consumes.
#[async_trait]
pub trait DiscordRest: Send + Sync {
    /// Send a message, optionally with one row of buttons. `role_mentions`
    /// controls whether `<@&role>` in the content pings.
    async fn create_message(
        &self,
        channel_id: &str,
        content: &str,
        components: &[ActionButton],
        role_mentions: bool,
    ) -> Result<MessageRef, DiscordError>;

    /// Create a forum post (thread with an opening message).
    async fn create_forum_post(
        &self,
        channel_id: &str,
        name: &str,
        content: &str,
    ) -> Result<MessageRef, DiscordError>;

    /// Pin a message in a channel.
    async fn pin_message(&self, channel_id: &str, message_id: &str) -> Result<(), DiscordError>;
}

#[cfg(test)]
pub mod testing {
    //! Scripted Discord REST client for scheduler tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// A recorded outbound call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SentCall {
        Message {
            channel_id: String,
            content: String,
            button_ids: Vec<String>,
        },
        ForumPost {
            channel_id: String,
            name: String,
            content: String,
        },
        Pin {
            channel_id: String,
            message_id: String,
        },
    }

    type FailureFactory = Box<dyn Fn() -> DiscordError + Send>;

    /// [`DiscordRest`] that records calls and can fail per channel.
    #[derive(Default)]
    pub struct MockDiscordRest {
        calls: Mutex<Vec<SentCall>>,
        failures: Mutex<HashMap<String, (usize, FailureFactory)>>,
        next_id: AtomicU64,
    }

    impl MockDiscordRest {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next `times` sends to `channel_id` with errors from `make`.
        pub fn fail_channel(
            &self,
            channel_id: &str,
            times: usize,
            make: impl Fn() -> DiscordError + Send + 'static,
        ) {
            self.failures
                .lock()
                .unwrap()
                .insert(channel_id.to_string(), (times, Box::new(make)));
        }

        pub fn calls(&self) -> Vec<SentCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn messages_to(&self, channel_id: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| {
                    matches!(c, SentCall::Message { channel_id: id, .. } if id == channel_id)
                })
                .count()
        }

        pub fn forum_posts(&self) -> Vec<(String, String)> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| match c {
                    SentCall::ForumPost { channel_id, name, .. } => {
                        Some((channel_id.clone(), name.clone()))
                    }
                    _ => None,
                })
                .collect()
        }

        fn take_failure(&self, channel_id: &str) -> Option<DiscordError> {
            let mut failures = self.failures.lock().unwrap();
            if let Some((remaining, make)) = failures.get_mut(channel_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Some(make());
                }
            }
            None
        }

        fn next_ref(&self, channel_id: &str) -> MessageRef {
            MessageRef {
                id: self.next_id.fetch_add(1, Ordering::Relaxed).to_string(),
                channel_id: channel_id.to_string(),
            }
        }
    }

    #[async_trait]
    impl DiscordRest for MockDiscordRest {
        async fn create_message(
            &self,
            channel_id: &str,
            content: &str,
            components: &[ActionButton],
            _role_mentions: bool,
        ) -> Result<MessageRef, DiscordError> {
            if let Some(error) = self.take_failure(channel_id) {
                return Err(error);
            }
            self.calls.lock().unwrap().push(SentCall::Message {
                channel_id: channel_id.to_string(),
                content: content.to_string(),
                button_ids: components.iter().map(|b| b.custom_id.clone()).collect(),
            });
            Ok(self.next_ref(channel_id))
        }

        async fn create_forum_post(
            &self,
            channel_id: &str,
            name: &str,
            content: &str,
        ) -> Result<MessageRef, DiscordError> {
            if let Some(error) = self.take_failure(channel_id) {
                return Err(error);
            }
            self.calls.lock().unwrap().push(SentCall::ForumPost {
                channel_id: channel_id.to_string(),
                name: name.to_string(),
                content: content.to_string(),
            });
            Ok(self.next_ref(channel_id))
        }

        async fn pin_message(
            &self,
            channel_id: &str,
            message_id: &str,
        ) -> Result<(), DiscordError> {
            self.calls.lock().unwrap().push(SentCall::Pin {
                channel_id: channel_id.to_string(),
                message_id: message_id.to_string(),
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_errors() {
        assert!(DiscordError::NotFound("1".into()).is_terminal());
        assert!(DiscordError::Forbidden("1".into()).is_terminal());
        assert!(DiscordError::InvalidChannel("x".into()).is_terminal());
        assert!(!DiscordError::RateLimited { retry_after: None }.is_terminal());
        assert!(!DiscordError::Internal {
            status: 500,
            message: "oops".into()
        }
        .is_terminal());
    }

    #[test]
    fn test_button_wire_codes() {
        assert_eq!(ButtonStyle::Primary.code(), 1);
        assert_eq!(ButtonStyle::Success.code(), 3);
    }
}
