//! Challenge announcement scheduler.
//!
//! Polls for challenges releasing within the look-ahead window, queues each
//! one once, and fans the announcement out to every active squad's channel
//! with role mention, action buttons, and a pin. A challenge counts as done
//! when at least one channel succeeded; it is then marked announced and
//! released through the API.

use std::sync::Arc;

use chrono::Utc;

use crate::api::{ApiClient, RequestOptions};
use crate::cache::Cache;
use crate::discord::{ActionButton, DiscordRest};
use crate::error::ServiceError;
use crate::models::{
    ChallengeAnnouncement, ChallengeDetailResponse, ChallengeListResponse, ServiceHealth,
};
use crate::schedulers::{
    deliver_batch, format_announcement, squad_channels, ChannelSend, QueuedJobs, TaskHandle,
    LOOKAHEAD_SECONDS, POLL_INTERVAL,
};
use crate::services::ServiceCore;

pub struct ChallengeScheduler {
    core: ServiceCore,
    rest: Arc<dyn DiscordRest>,
    task: TaskHandle,
    queued: QueuedJobs,
}

impl ChallengeScheduler {
    pub fn new(
        api: Arc<dyn ApiClient>,
        cache: Option<Arc<dyn Cache>>,
        rest: Arc<dyn DiscordRest>,
    ) -> Self {
        Self {
            core: ServiceCore::new(api, cache, "ChallengeScheduler"),
            rest,
            task: TaskHandle::new(),
            queued: QueuedJobs::new(),
        }
    }

    /// Initialize and start the announcement loop.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), ServiceError> {
        self.core.initialize()?;
        self.start().await;
        tracing::info!("Challenge scheduler initialized");
        Ok(())
    }

    pub async fn start(self: &Arc<Self>) {
        if !self.task.try_start() {
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop().await });
        self.task.attach(handle).await;
        tracing::info!("Started challenge announcement scheduler");
    }

    /// Stop the loop and release the API client.
    pub async fn cleanup(&self) {
        self.task.stop().await;
        self.core.cleanup().await;
        tracing::info!("Challenge scheduler cleaned up");
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

    /// One poll: fetch the look-ahead window and queue unseen challenges.
    pub async fn check_and_queue(self: &Arc<Self>) {
        let upcoming = self.fetch_upcoming().await;
        if upcoming.is_empty() {
            return;
        }
        tracing::info!("Found {} challenges in the look-ahead window", upcoming.len());

        for challenge in upcoming {
            let id = challenge.id.to_string();
            if self.queued.claim(&id).await {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.fire(challenge).await });
            } else {
                tracing::debug!("Challenge {id} already queued, skipping");
            }
        }
    }

    /// Sleep until release time, announce, release the id.
    async fn fire(self: Arc<Self>, challenge: ChallengeAnnouncement) {
        let id = challenge.id.to_string();

        let delay = challenge.release_time - Utc::now();
        if let Ok(delay) = delay.to_std() {
            tracing::info!(
                "Queuing challenge '{}' to announce in {delay:?}",
                challenge.title.as_deref().unwrap_or("Challenge")
            );
            tokio::time::sleep(delay).await;
        }

        self.announce(&challenge).await;
        self.queued.release(&id).await;
    }

    /// Fan out to squad channels; mark announced and released when at least
    /// one channel succeeded.
    pub async fn announce(&self, challenge: &ChallengeAnnouncement) {
        let title = challenge.title.as_deref().unwrap_or("New Challenge");
        let description = challenge.description.as_deref().unwrap_or("");

        let channels = squad_channels(self.core.api(), &challenge.guild_id).await;
        if channels.is_empty() {
            tracing::warn!(
                "Challenge {} has no squad channels configured in guild {}",
                challenge.id,
                challenge.guild_id
            );
            return;
        }

        let buttons = vec![
            ActionButton::primary(format!("get_input:{}", challenge.id), "Get Input", "📥"),
            ActionButton::success(
                format!("submit_solution:{}", challenge.id),
                "Submit Solution",
                "📤",
            ),
        ];

        let sends: Vec<ChannelSend> = channels
            .iter()
            .map(|channel| ChannelSend {
                channel_id: channel.channel_id.clone(),
                content: format_announcement(title, description, channel.role_id.as_deref()),
                buttons: buttons.clone(),
            })
            .collect();
        let total = sends.len();

        let successes = deliver_batch(&self.rest, sends, true).await;
        if successes == 0 {
            tracing::error!("Failed to announce challenge '{title}' to any channel");
            return;
        }

        if let Err(e) = self.mark_announced(challenge).await {
            tracing::error!("Failed to mark challenge {} as announced: {e}", challenge.id);
        }
        if let Err(e) = self.mark_released(challenge).await {
            tracing::error!("Failed to mark challenge {} as released: {e}", challenge.id);
        }
        tracing::info!("Announced challenge '{title}' ({successes}/{total} squad channels)");
    }

    /// Manually announce a challenge immediately.
    pub async fn announce_now(&self, challenge_id: &str) -> Result<(), ServiceError> {
        self.core.ensure_initialized()?;

        let response = self
            .core
            .api()
            .get(&format!("/challenges/{challenge_id}"), RequestOptions::new())
            .await?;
        let detail: ChallengeDetailResponse = response.json()?;

        let Some(challenge) = detail.challenge else {
            return Err(ServiceError::NotFound {
                resource_type: "challenge",
                resource_id: challenge_id.to_string(),
            });
        };

        self.announce(&challenge).await;
        Ok(())
    }

    async fn fetch_upcoming(&self) -> Vec<ChallengeAnnouncement> {
        let result = self
            .core
            .api()
            .get(
                "/challenges/upcoming-announcements",
                RequestOptions::new().query("seconds", LOOKAHEAD_SECONDS.to_string()),
            )
            .await
            .and_then(|r| r.json::<ChallengeListResponse>());

        match result {
            Ok(parsed) => parsed.challenges,
            Err(e) => {
                tracing::error!("Failed to get upcoming challenge announcements: {e}");
                Vec::new()
            }
        }
    }

    async fn mark_announced(&self, challenge: &ChallengeAnnouncement) -> Result<(), ServiceError> {
        self.core
            .api()
            .post(
                &format!("/challenges/{}/mark-announced", challenge.id),
                RequestOptions::new(),
            )
            .await?;
        Ok(())
    }

    async fn mark_released(&self, challenge: &ChallengeAnnouncement) -> Result<(), ServiceError> {
        self.core
            .api()
            .post(
                &format!("/challenges/{}/mark-released", challenge.id),
                RequestOptions::new(),
            )
            .await?;
        Ok(())
    }
}
