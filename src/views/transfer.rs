//! Bytes transfer modal: field specification and submit handling.

use std::sync::Arc;

use crate::error::ServiceError;
use crate::models::UserRef;
use crate::services::bytes::BytesService;
use crate::util::format_thousands;
use crate::views::embeds::{Embed, EmbedFactory};

/// Text input style within a modal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStyle {
    Short,
    Paragraph,
}

/// One text input of a modal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalField {
    pub custom_id: &'static str,
    pub label: String,
    pub placeholder: String,
    pub required: bool,
    pub max_length: u16,
    pub style: FieldStyle,
}

/// A modal ready for the frontend to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferModal {
    pub title: String,
    pub custom_id: String,
    pub fields: Vec<ModalField>,
}

/// Build the send-bytes modal for a recipient under a guild's transfer cap.
pub fn transfer_modal(recipient: &UserRef, max_transfer: i64) -> TransferModal {
    TransferModal {
        title: format!("Send Bytes to {}", recipient.display_name),
        custom_id: format!("send_bytes_modal:{}", recipient.id),
        fields: vec![
            ModalField {
                custom_id: "amount",
                label: "Amount".to_string(),
                placeholder: format!("Enter amount (1-{})", format_thousands(max_transfer)),
                required: true,
                max_length: 10,
                style: FieldStyle::Short,
            },
            ModalField {
                custom_id: "reason",
                label: "Reason (Optional)".to_string(),
                placeholder: "Why are you sending these bytes?".to_string(),
                required: false,
                max_length: 200,
                style: FieldStyle::Paragraph,
            },
        ],
    }
}

/// Values the user submitted.
#[derive(Debug, Clone, Default)]
pub struct ModalSubmission {
    pub amount: Option<String>,
    pub reason: Option<String>,
}

/// How the frontend should answer the interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModalResponse {
    /// Visible to everyone; replies to the source message when present.
    Public {
        embed: Embed,
        reply_to: Option<String>,
    },
    /// Visible only to the submitting user.
    Ephemeral { embed: Embed },
}

/// Handles a submitted transfer modal.
pub struct TransferModalHandler {
    recipient: UserRef,
    guild_id: String,
    giver: UserRef,
    max_transfer: i64,
    bytes: Arc<BytesService>,
    embeds: EmbedFactory,
    /// Message to reply to when invoked from a message context menu.
    target_message_id: Option<String>,
}

impl TransferModalHandler {
    pub fn new(
        recipient: UserRef,
        guild_id: impl Into<String>,
        giver: UserRef,
        max_transfer: i64,
        bytes: Arc<BytesService>,
        embeds: EmbedFactory,
        target_message_id: Option<String>,
    ) -> Self {
        Self {
            recipient,
            guild_id: guild_id.into(),
            giver,
            max_transfer,
            bytes,
            embeds,
            target_message_id,
        }
    }

    /// Validate the input, run the transfer, and render the outcome.
    pub async fn handle_submit(&self, submission: ModalSubmission) -> ModalResponse {
        let amount_str = match submission.amount.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => return self.ephemeral_error("Amount is required."),
        };

        let amount: i64 = match amount_str.parse() {
            Ok(amount) => amount,
            Err(_) => return self.ephemeral_error("Amount must be a valid number."),
        };
        if amount < 1 {
            return self.ephemeral_error("Amount must be at least 1 byte.");
        }
        if amount > self.max_transfer {
            return self.ephemeral_error(&format!(
                "Amount cannot exceed {} bytes (server limit).",
                format_thousands(self.max_transfer)
            ));
        }

        let reason = submission
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());

        tracing::info!(
            "Processing bytes transfer: {} -> {}, amount: {amount}",
            self.giver.display_name,
            self.recipient.display_name
        );

        let result = self
            .bytes
            .transfer_bytes(&self.guild_id, &self.giver, &self.recipient, amount, reason)
            .await;

        match result {
            Ok(result) if result.success => {
                let mut description = format!(
                    "{} sent {} bytes to {}",
                    self.giver.display_name,
                    format_thousands(amount),
                    self.recipient.display_name
                );
                if let Some(reason) = reason {
                    description.push_str("\n\n");
                    description.push_str(reason);
                }
                ModalResponse::Public {
                    embed: self.embeds.success("BYTES SENT", &description),
                    reply_to: self.target_message_id.clone(),
                }
            }
            Ok(result) if result.is_cooldown_error => {
                let message = result
                    .reason
                    .unwrap_or_else(|| "Transfer is currently on cooldown.".to_string());
                ModalResponse::Ephemeral {
                    embed: self.embeds.cooldown(&message, result.cooldown_end_timestamp),
                }
            }
            Ok(result) => {
                let message = result
                    .reason
                    .unwrap_or_else(|| "Transfer failed. Please try again later.".to_string());
                self.ephemeral_error(&message)
            }
            Err(e @ ServiceError::InsufficientBalance { .. }) => {
                self.ephemeral_error(&e.user_message())
            }
            Err(e @ ServiceError::Validation { .. }) => self.ephemeral_error(&e.user_message()),
            Err(ServiceError::Internal(_)) | Err(ServiceError::NotInitialized(_)) => {
                self.ephemeral_error("An unexpected error occurred. Please try again later.")
            }
            Err(e) => {
                tracing::error!("Service error in transfer: {e}");
                self.ephemeral_error("Transfer failed. Please try again later.")
            }
        }
    }

    fn ephemeral_error(&self, message: &str) -> ModalResponse {
        ModalResponse::Ephemeral {
            embed: self.embeds.error(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::MockApiClient;
    use crate::api::HttpMethod;
    use crate::views::embeds::EmbedKind;

    const GUILD: &str = "111111111111111111";
    const GIVER: &str = "222222222222222222";
    const RECEIVER: &str = "333333333333333333";

    fn handler(target_message_id: Option<String>) -> (TransferModalHandler, Arc<MockApiClient>) {
        let api = Arc::new(MockApiClient::new());
        let bytes = Arc::new(BytesService::new(api.clone(), None));
        bytes.initialize().unwrap();

        let handler = TransferModalHandler::new(
            UserRef::new(RECEIVER, "alice"),
            GUILD,
            UserRef::new(GIVER, "bob"),
            1000,
            bytes,
            EmbedFactory::new(),
            target_message_id,
        );
        (handler, api)
    }

    fn submission(amount: &str, reason: Option<&str>) -> ModalSubmission {
        ModalSubmission {
            amount: Some(amount.to_string()),
            reason: reason.map(String::from),
        }
    }

    fn stub_transfer_success(api: &MockApiClient, giver_balance: i64) {
        api.stub_json(
            HttpMethod::Get,
            &format!("/guilds/{GUILD}/bytes/balance/{GIVER}"),
            200,
            serde_json::json!({
                "guild_id": GUILD,
                "user_id": GIVER,
                "balance": giver_balance,
                "total_received": giver_balance,
                "total_sent": 0
            }),
        );
        api.stub_json(
            HttpMethod::Get,
            &format!("/guilds/{GUILD}/bytes/balance/{RECEIVER}"),
            200,
            serde_json::json!({
                "guild_id": GUILD,
                "user_id": RECEIVER,
                "balance": 500,
                "total_received": 500,
                "total_sent": 0
            }),
        );
        api.stub_json(
            HttpMethod::Post,
            &format!("/guilds/{GUILD}/bytes/transactions"),
            200,
            serde_json::json!({
                "id": "8f5c5e63-58a4-4f3b-9a39-7d30a3a80b11",
                "amount": 50,
                "giver_id": GIVER,
                "receiver_id": RECEIVER
            }),
        );
    }

    #[tokio::test]
    async fn test_input_validation_responses() {
        let (handler, _api) = handler(None);

        for (input, expected) in [
            ("", "Amount is required."),
            ("abc", "Amount must be a valid number."),
            ("0", "Amount must be at least 1 byte."),
            ("1001", "Amount cannot exceed 1,000 bytes (server limit)."),
        ] {
            let response = handler.handle_submit(submission(input, None)).await;
            match response {
                ModalResponse::Ephemeral { embed } => {
                    assert_eq!(embed.kind, EmbedKind::Error);
                    assert_eq!(embed.description, expected);
                }
                other => panic!("expected ephemeral error, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_success_renders_public_embed_with_reason() {
        let (handler, api) = handler(Some("4242".to_string()));
        stub_transfer_success(&api, 100);

        let response = handler.handle_submit(submission("50", Some("great work"))).await;
        match response {
            ModalResponse::Public { embed, reply_to } => {
                assert_eq!(embed.kind, EmbedKind::Success);
                assert_eq!(embed.title, "BYTES SENT");
                assert_eq!(embed.description, "bob sent 50 bytes to alice\n\ngreat work");
                assert_eq!(reply_to.as_deref(), Some("4242"));
            }
            other => panic!("expected public response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cooldown_renders_ephemeral_cooldown_embed() {
        let (handler, api) = handler(None);
        api.stub_json(
            HttpMethod::Get,
            &format!("/guilds/{GUILD}/bytes/balance/{GIVER}"),
            200,
            serde_json::json!({
                "guild_id": GUILD,
                "user_id": GIVER,
                "balance": 100,
                "total_received": 100,
                "total_sent": 0
            }),
        );
        api.stub_json(
            HttpMethod::Post,
            &format!("/guilds/{GUILD}/bytes/transactions"),
            400,
            serde_json::json!({
                "detail": "Transfer cooldown active. Please wait 3 hours.|1705320000"
            }),
        );

        let response = handler.handle_submit(submission("50", None)).await;
        match response {
            ModalResponse::Ephemeral { embed } => {
                assert_eq!(embed.kind, EmbedKind::Cooldown);
                assert!(embed.description.contains("Transfer cooldown active."));
                assert_eq!(embed.cooldown_end, Some(1705320000));
            }
            other => panic!("expected ephemeral cooldown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_insufficient_balance_renders_numbers() {
        let (handler, api) = handler(None);
        api.stub_json(
            HttpMethod::Get,
            &format!("/guilds/{GUILD}/bytes/balance/{GIVER}"),
            200,
            serde_json::json!({
                "guild_id": GUILD,
                "user_id": GIVER,
                "balance": 10,
                "total_received": 10,
                "total_sent": 0
            }),
        );

        let response = handler.handle_submit(submission("50", None)).await;
        match response {
            ModalResponse::Ephemeral { embed } => {
                assert_eq!(embed.kind, EmbedKind::Error);
                assert_eq!(
                    embed.description,
                    "Insufficient balance! You need 50 bytes but only have 10."
                );
            }
            other => panic!("expected ephemeral error, got {other:?}"),
        }
    }

    #[test]
    fn test_modal_field_specification() {
        let modal = transfer_modal(&UserRef::new(RECEIVER, "alice"), 5000);
        assert_eq!(modal.title, "Send Bytes to alice");
        assert_eq!(modal.custom_id, format!("send_bytes_modal:{RECEIVER}"));

        let amount = &modal.fields[0];
        assert_eq!(amount.custom_id, "amount");
        assert!(amount.required);
        assert_eq!(amount.style, FieldStyle::Short);
        assert!(amount.placeholder.contains("1-5,000"));

        let reason = &modal.fields[1];
        assert_eq!(reason.custom_id, "reason");
        assert!(!reason.required);
        assert_eq!(reason.max_length, 200);
        assert_eq!(reason.style, FieldStyle::Paragraph);
    }
}
