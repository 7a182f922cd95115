//! Reqwest-backed Discord REST client.

use async_trait::async_trait;
use serde::Deserialize;

use super::{ActionButton, DiscordError, DiscordRest, MessageRef};

const API_BASE: &str = "https://discord.com/api/v10";

/// Rate limits longer than this are treated as terminal for the operation.
const MAX_TOLERATED_RATE_LIMIT_SECS: f64 = 30.0;

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: String,
    channel_id: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    retry_after: Option<f64>,
}

/// Discord REST client authorized with a bot token.
pub struct HttpDiscordRest {
    client: reqwest::Client,
    bot_token: String,
}

impl HttpDiscordRest {
    pub fn new(bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.to_string(),
        }
    }

    fn validate_channel(channel_id: &str) -> Result<(), DiscordError> {
        if channel_id.is_empty() || !channel_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(DiscordError::InvalidChannel(channel_id.to_string()));
        }
        Ok(())
    }

    fn components_json(components: &[ActionButton]) -> serde_json::Value {
        let buttons: Vec<serde_json::Value> = components
            .iter()
            .map(|button| {
                let mut value = serde_json::json!({
                    "type": 2,
                    "style": button.style.code(),
                    "label": button.label,
                    "custom_id": button.custom_id,
                });
                if let Some(emoji) = &button.emoji {
                    value["emoji"] = serde_json::json!({ "name": emoji });
                }
                value
            })
            .collect();

        serde_json::json!([{ "type": 1, "components": buttons }])
    }

    async fn execute(
        &self,
        channel_id: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, DiscordError> {
        let response = request
            .header("Authorization", format!("Bot {}", self.bot_token))
            .send()
            .await
            .map_err(|e| DiscordError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(response),
            404 => Err(DiscordError::NotFound(channel_id.to_string())),
            403 => Err(DiscordError::Forbidden(channel_id.to_string())),
            429 => {
                let retry_after = response
                    .json::<RateLimitBody>()
                    .await
                    .ok()
                    .and_then(|b| b.retry_after);
                match retry_after {
                    Some(secs) if secs > MAX_TOLERATED_RATE_LIMIT_SECS => {
                        Err(DiscordError::RateLimitTooLong { retry_after: secs })
                    }
                    other => Err(DiscordError::RateLimited { retry_after: other }),
                }
            }
            _ => {
                let message = response.text().await.unwrap_or_default();
                Err(DiscordError::Internal { status, message })
            }
        }
    }
}

#[async_trait]
impl DiscordRest for HttpDiscordRest {
    async fn create_message(
        &self,
        channel_id: &str,
        content: &str,
        components: &[ActionButton],
        role_mentions: bool,
    ) -> Result<MessageRef, DiscordError> {
        Self::validate_channel(channel_id)?;

        let mut body = serde_json::json!({
            "content": content,
            "allowed_mentions": {
                "parse": if role_mentions { vec!["roles"] } else { Vec::new() }
            },
        });
        if !components.is_empty() {
            body["components"] = Self::components_json(components);
        }

        let response = self
            .execute(
                channel_id,
                self.client
                    .post(format!("{API_BASE}/channels/{channel_id}/messages"))
                    .json(&body),
            )
            .await?;

        let message: MessageResponse = response
            .json()
            .await
            .map_err(|e| DiscordError::Network(e.to_string()))?;

        Ok(MessageRef {
            id: message.id,
            channel_id: message.channel_id,
        })
    }

    async fn create_forum_post(
        &self,
        channel_id: &str,
        name: &str,
        content: &str,
    ) -> Result<MessageRef, DiscordError> {
        Self::validate_channel(channel_id)?;

        let body = serde_json::json!({
            "name": name,
            "message": { "content": content },
        });

        let response = self
            .execute(
                channel_id,
                self.client
                    .post(format!("{API_BASE}/channels/{channel_id}/threads"))
                    .json(&body),
            )
            .await?;

        // A created thread carries its own id; fall back to the parent.
        #[derive(Deserialize)]
        struct ThreadResponse {
            id: String,
        }
        let thread: ThreadResponse = response
            .json()
            .await
            .map_err(|e| DiscordError::Network(e.to_string()))?;

        Ok(MessageRef {
            id: thread.id,
            channel_id: channel_id.to_string(),
        })
    }

    async fn pin_message(&self, channel_id: &str, message_id: &str) -> Result<(), DiscordError> {
        Self::validate_channel(channel_id)?;

        self.execute(
            channel_id,
            self.client
                .put(format!("{API_BASE}/channels/{channel_id}/pins/{message_id}")),
        )
        .await?;

        Ok(())
    }
}
