//! Quest announcement scheduler.
//!
//! Same shape as the challenge scheduler, on the quest endpoints: announced
//! quests are marked announced and active.

use std::sync::Arc;

use chrono::Utc;

use crate::api::{ApiClient, RequestOptions};
use crate::cache::Cache;
use crate::discord::{ActionButton, DiscordRest};
use crate::error::ServiceError;
use crate::models::{QuestAnnouncement, QuestListResponse, ServiceHealth};
use crate::schedulers::{
    deliver_batch, format_announcement, squad_channels, ChannelSend, QueuedJobs, TaskHandle,
    LOOKAHEAD_SECONDS, POLL_INTERVAL,
};
use crate::services::ServiceCore;

pub struct QuestScheduler {
    core: ServiceCore,
    rest: Arc<dyn DiscordRest>,
    task: TaskHandle,
    queued: QueuedJobs,
}

impl QuestScheduler {
    pub fn new(
        api: Arc<dyn ApiClient>,
        cache: Option<Arc<dyn Cache>>,
        rest: Arc<dyn DiscordRest>,
    ) -> Self {
        Self {
            core: ServiceCore::new(api, cache, "QuestScheduler"),
            rest,
            task: TaskHandle::new(),
            queued: QueuedJobs::new(),
        }
    }

    pub async fn initialize(self: &Arc<Self>) -> Result<(), ServiceError> {
        self.core.initialize()?;
        self.start().await;
        tracing::info!("Quest scheduler initialized");
        Ok(())
    }

    pub async fn start(self: &Arc<Self>) {
        if !self.task.try_start() {
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop().await });
        self.task.attach(handle).await;
        tracing::info!("Started quest announcement scheduler");
    }

    pub async fn cleanup(&self) {
        self.task.stop().await;
        self.core.cleanup().await;
        tracing::info!("Quest scheduler cleaned up");
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
                "/quests/upcoming-announcements",
                RequestOptions::new().query("seconds", LOOKAHEAD_SECONDS.to_string()),
            )
            .await
            .and_then(|r| r.json::<QuestListResponse>());

        let quests = match result {
            Ok(parsed) => parsed.quests,
            Err(e) => {
                tracing::error!("Failed checking upcoming quests: {e}");
                return;
            }
        };

        for quest in quests {
            let id = quest.id.to_string();
            if self.queued.claim(&id).await {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.fire(quest).await });
            }
        }
    }

    async fn fire(self: Arc<Self>, quest: QuestAnnouncement) {
        let id = quest.id.to_string();

        if let Ok(delay) = (quest.release_time - Utc::now()).to_std() {
            tokio::time::sleep(delay).await;
        }

        self.announce(&quest).await;
        self.queued.release(&id).await;
    }

    pub async fn announce(&self, quest: &QuestAnnouncement) {
        let title = format!("🧭 {}", quest.title.as_deref().unwrap_or("Daily Quest"));
        let description = quest.description.as_deref().unwrap_or("");

        let channels = squad_channels(self.core.api(), &quest.guild_id).await;
        if channels.is_empty() {
            tracing::warn!("No squad channels found for quest {}", quest.id);
            return;
        }

        let buttons = vec![
            ActionButton::primary(
                format!("get_daily_quest_input:{}", quest.id),
                "Get Input",
                "📥",
            ),
            ActionButton::success(format!("submit_daily_quest:{}", quest.id), "Submit", "📤"),
        ];

        let sends: Vec<ChannelSend> = channels
            .iter()
            .map(|channel| ChannelSend {
                channel_id: channel.channel_id.clone(),
                content: format_announcement(&title, description, channel.role_id.as_deref()),
                buttons: buttons.clone(),
            })
            .collect();

        let successes = deliver_batch(&self.rest, sends, true).await;
        if successes == 0 {
            tracing::error!("Failed to announce quest {} to any channel", quest.id);
            return;
        }

        if let Err(e) = self.mark(quest, "mark-announced").await {
            tracing::error!("Failed to mark quest {} announced: {e}", quest.id);
        }
        if let Err(e) = self.mark(quest, "mark-active").await {
            tracing::error!("Failed to mark quest {} active: {e}", quest.id);
        }
    }

    async fn mark(&self, quest: &QuestAnnouncement, transition: &str) -> Result<(), ServiceError> {
        self.core
            .api()
            .post(
                &format!("/quests/{}/{transition}", quest.id),
                RequestOptions::new(),
            )
            .await?;
        Ok(())
    }
}
