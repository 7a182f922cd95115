//! Scheduled message scheduler.
//!
//! One-shot messages fired at their scheduled time. The primary body goes to
//! every active squad's channel with a role mention and no buttons; when the
//! job lists announcement channels, an alternate body (falling back to the
//! primary) goes there without a mention. Messages are pinned.

use std::sync::Arc;

use chrono::Utc;

use crate::api::{ApiClient, RequestOptions};
use crate::cache::Cache;
use crate::discord::DiscordRest;
use crate::error::ServiceError;
use crate::models::{ScheduledMessage, ScheduledMessageListResponse, ServiceHealth};
use crate::schedulers::{
    deliver_batch, format_announcement, squad_channels, ChannelSend, QueuedJobs, TaskHandle,
    LOOKAHEAD_SECONDS, POLL_INTERVAL,
};
use crate::services::ServiceCore;

pub struct ScheduledMessageScheduler {
    core: ServiceCore,
    rest: Arc<dyn DiscordRest>,
    task: TaskHandle,
    queued: QueuedJobs,
}

impl ScheduledMessageScheduler {
    pub fn new(
        api: Arc<dyn ApiClient>,
        cache: Option<Arc<dyn Cache>>,
        rest: Arc<dyn DiscordRest>,
    ) -> Self {
        Self {
            core: ServiceCore::new(api, cache, "ScheduledMessageScheduler"),
            rest,
            task: TaskHandle::new(),
            queued: QueuedJobs::new(),
        }
    }

    pub async fn initialize(self: &Arc<Self>) -> Result<(), ServiceError> {
        self.core.initialize()?;
        self.start().await;
        tracing::info!("Scheduled message scheduler initialized");
        Ok(())
    }

    pub async fn start(self: &Arc<Self>) {
        if !self.task.try_start() {
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop().await });
        self.task.attach(handle).await;
        tracing::info!("Started scheduled message scheduler");
    }

    pub async fn cleanup(&self) {
        self.task.stop().await;
        self.core.cleanup().await;
        tracing::info!("Scheduled message scheduler cleaned up");
    }

    pub async fn health_check(&self) -> ServiceHealth {
        let status = if self.task.is_running() { "running" } else { "stopped" };
        ServiceHealth::healthy(self.core.name(), None).with_details(serde_json::json!({
            "scheduler_status": status,
            "queued_jobs": self.queued.len().await,
        }))
    }

    async fn run_loop(self: Arc<Self>) {
        while self.task.is_running() {
            self.check_and_queue().await;
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn check_and_queue(self: &Arc<Self>) {
        let result = self
            .core
            .api()
            .get(
                "/scheduled-messages/upcoming",
                RequestOptions::new().query("seconds", LOOKAHEAD_SECONDS.to_string()),
            )
            .await
            .and_then(|r| r.json::<ScheduledMessageListResponse>());

        let messages = match result {
            Ok(parsed) => parsed.scheduled_messages,
            Err(e) => {
                tracing::error!("Failed to get upcoming scheduled messages: {e}");
                return;
            }
        };

        for message in messages {
            let id = message.id.to_string();
            if self.queued.claim(&id).await {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.fire(message).await });
            } else {
                tracing::debug!("Message {id} already queued, skipping");
            }
        }
    }

    async fn fire(self: Arc<Self>, message: ScheduledMessage) {
        let id = message.id.to_string();

        if let Ok(delay) = (message.scheduled_time - Utc::now()).to_std() {
            tracing::info!(
                "Queuing message '{}' to send in {delay:?}",
                message.title.as_deref().unwrap_or("Scheduled Message")
            );
            tokio::time::sleep(delay).await;
        }

        self.send(&message).await;
        self.queued.release(&id).await;
    }

    /// Deliver to squad channels (with mention) and, when configured, to the
    /// job's announcement channels (without). Marked sent when any channel
    /// succeeded.
    pub async fn send(&self, message: &ScheduledMessage) {
        let title = message.title.as_deref().unwrap_or("Scheduled Message");
        let description = message.description.as_deref().unwrap_or("");

        let squads = squad_channels(self.core.api(), &message.guild_id).await;
        if squads.is_empty() && message.announcement_channels.is_empty() {
            tracing::warn!(
                "Scheduled message {} has no channels configured in guild {}",
                message.id,
                message.guild_id
            );
            return;
        }

        let mut sends: Vec<ChannelSend> = squads
            .iter()
            .map(|channel| ChannelSend {
                channel_id: channel.channel_id.clone(),
                content: format_announcement(title, description, channel.role_id.as_deref()),
                buttons: Vec::new(),
            })
            .collect();

        if !message.announcement_channels.is_empty() {
            let body = message
                .announcement_channel_message
                .as_deref()
                .filter(|m| !m.is_empty())
                .unwrap_or(description);
            let content = format_announcement(title, body, None);
            sends.extend(message.announcement_channels.iter().map(|channel_id| {
                ChannelSend {
                    channel_id: channel_id.clone(),
                    content: content.clone(),
                    buttons: Vec::new(),
                }
            }));
        }

        let total = sends.len();
        let successes = deliver_batch(&self.rest, sends, true).await;
        if successes == 0 {
            tracing::error!("Failed to send scheduled message '{title}' to any channel");
            return;
        }

        if let Err(e) = self.mark_sent(message).await {
            tracing::error!("Failed to mark scheduled message {} as sent: {e}", message.id);
        }
        tracing::info!("Sent scheduled message '{title}' ({successes}/{total} channels)");
    }

    async fn mark_sent(&self, message: &ScheduledMessage) -> Result<(), ServiceError> {
        self.core
            .api()
            .post(
                &format!("/scheduled-messages/{}/mark-sent", message.id),
                RequestOptions::new(),
            )
            .await?;
        Ok(())
    }
}
