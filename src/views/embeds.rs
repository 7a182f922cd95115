//! Image-embed descriptions for Discord responses.
//!
//! The factory is passed into handlers as a constructor dependency so
//! rendering can be themed or swapped without touching the handlers.

/// Visual style of an embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedKind {
    Success,
    Error,
    Cooldown,
}

/// A rendered embed, ready for the frontend to draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embed {
    pub kind: EmbedKind,
    pub title: String,
    pub description: String,
    /// Unix seconds at which a cooldown ends, when known.
    pub cooldown_end: Option<i64>,
}

/// Builds the embeds used across views.
#[derive(Debug, Clone, Default)]
pub struct EmbedFactory;

impl EmbedFactory {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, title: &str, description: &str) -> Embed {
        Embed {
            kind: EmbedKind::Success,
            title: title.to_string(),
            description: description.to_string(),
            cooldown_end: None,
        }
    }

    pub fn error(&self, message: &str) -> Embed {
        Embed {
            kind: EmbedKind::Error,
            title: "ERROR".to_string(),
            description: message.to_string(),
            cooldown_end: None,
        }
    }

    /// Cooldown embed with a relative Discord timestamp when the end is known.
    pub fn cooldown(&self, message: &str, end_timestamp: Option<i64>) -> Embed {
        let description = match end_timestamp {
            Some(ts) => format!("{message}\nYou can send bytes again <t:{ts}:R>."),
            None => message.to_string(),
        };
        Embed {
            kind: EmbedKind::Cooldown,
            title: "COOLDOWN ACTIVE".to_string(),
            description,
            cooldown_end: end_timestamp,
        }
    }
}
