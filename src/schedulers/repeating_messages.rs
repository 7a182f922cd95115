//! Repeating message scheduler.
//!
//! Wakes just after every minute boundary, fetches due repeating messages,
//! and sends each to its single channel. Content arrives pre-formatted (role
//! mention included when configured) and is never pinned. When several fire
//! times of one series are past due after downtime, only the most recent is
//! sent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use uuid::Uuid;

use crate::api::{ApiClient, RequestOptions};
use crate::cache::Cache;
use crate::discord::DiscordRest;
use crate::error::ServiceError;
use crate::models::{RepeatingMessage, RepeatingMessageListResponse, ServiceHealth};
use crate::schedulers::{send_with_retry, ChannelSend, QueuedJobs, TaskHandle};
use crate::services::ServiceCore;
use crate::util::truncate_chars;

use super::DISCORD_MESSAGE_LIMIT;

/// Buffer past the minute boundary so the due query sees the new minute.
const MINUTE_ALIGN_BUFFER: Duration = Duration::from_millis(100);

pub struct RepeatingMessageScheduler {
    core: ServiceCore,
    rest: Arc<dyn DiscordRest>,
    task: TaskHandle,
    processing: QueuedJobs,
}

impl RepeatingMessageScheduler {
    pub fn new(
        api: Arc<dyn ApiClient>,
        cache: Option<Arc<dyn Cache>>,
        rest: Arc<dyn DiscordRest>,
    ) -> Self {
        Self {
            core: ServiceCore::new(api, cache, "RepeatingMessageScheduler"),
            rest,
            task: TaskHandle::new(),
            processing: QueuedJobs::new(),
        }
    }

    pub async fn initialize(self: &Arc<Self>) -> Result<(), ServiceError> {
        self.core.initialize()?;
        self.start().await;
        tracing::info!("Repeating message scheduler initialized");
        Ok(())
    }

    pub async fn start(self: &Arc<Self>) {
        if !self.task.try_start() {
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop().await });
        self.task.attach(handle).await;
        tracing::info!("Started repeating message scheduler");
    }

    pub async fn cleanup(&self) {
        self.task.stop().await;
        self.core.cleanup().await;
        tracing::info!("Repeating message scheduler cleaned up");
    }

    pub async fn health_check(&self) -> ServiceHealth {
        let status = if self.task.is_running() { "running" } else { "stopped" };
        ServiceHealth::healthy(self.core.name(), None).with_details(serde_json::json!({
            "scheduler_status": status,
            "processing_messages": self.processing.len().await,
        }))
    }

    async fn run_loop(self: Arc<Self>) {
        while self.task.is_running() {
            self.check_and_send_due().await;
            tokio::time::sleep(duration_until_next_minute(Utc::now())).await;
        }
    }

    /// One tick: fetch due messages and send the latest entry per series.
    pub async fn check_and_send_due(&self) {
        let result = self
            .core
            .api()
            .get("/repeating-messages/due", RequestOptions::new())
            .await
            .and_then(|r| r.json::<RepeatingMessageListResponse>());

        let due = match result {
            Ok(parsed) => parsed.repeating_messages,
            Err(e) => {
                tracing::error!("Failed to get due repeating messages: {e}");
                return;
            }
        };

        if due.is_empty() {
            return;
        }
        tracing::info!("Found {} due repeating messages", due.len());

        for message in latest_per_series(due) {
            let id = message.id.to_string();
            if !self.processing.claim(&id).await {
                tracing::warn!("Message {id} already processing, skipping");
                continue;
            }

            // Sequential on purpose: one series at a time, no send races.
            self.process(&message).await;
            self.processing.release(&id).await;
        }
    }

    async fn process(&self, message: &RepeatingMessage) {
        if message.channel_id.is_empty() || message.message_content.is_empty() {
            tracing::warn!("Repeating message {} missing required fields", message.id);
            return;
        }

        // Content is pre-formatted; only the length limit applies here.
        let content = truncate_chars(&message.message_content, DISCORD_MESSAGE_LIMIT).to_string();
        let send = ChannelSend {
            channel_id: message.channel_id.clone(),
            content,
            buttons: Vec::new(),
        };

        if send_with_retry(&self.rest, &send, false, 3, Duration::from_secs(2)).await {
            if let Err(e) = self.mark_sent(message.id).await {
                tracing::error!("Failed to mark repeating message {} as sent: {e}", message.id);
            }
        } else {
            tracing::error!("Failed to send repeating message {}", message.id);
        }
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), ServiceError> {
        self.core
            .api()
            .post(
                &format!("/repeating-messages/{id}/mark-sent"),
                RequestOptions::new(),
            )
            .await?;
        Ok(())
    }
}

/// Time left until the next minute boundary, plus a small buffer.
fn duration_until_next_minute(now: DateTime<Utc>) -> Duration {
    let into_minute =
        Duration::from_secs(u64::from(now.second())) + Duration::from_nanos(u64::from(now.nanosecond()));
    Duration::from_secs(60).saturating_sub(into_minute) + MINUTE_ALIGN_BUFFER
}

/// Collapse a due list to the most recent entry per series id, keeping the
/// original relative order of first appearance.
fn latest_per_series(due: Vec<RepeatingMessage>) -> Vec<RepeatingMessage> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut latest: HashMap<Uuid, RepeatingMessage> = HashMap::new();

    for message in due {
        match latest.get(&message.id) {
            Some(existing) if existing.next_send_time >= message.next_send_time => {}
            Some(_) => {
                latest.insert(message.id, message);
            }
            None => {
                order.push(message.id);
                latest.insert(message.id, message);
            }
        }
    }

    order.into_iter().filter_map(|id| latest.remove(&id)).collect()
}
