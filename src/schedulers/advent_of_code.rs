//! Advent of Code daily thread scheduler.
//!
//! Creates a discussion thread in each configured guild's forum channel for
//! every puzzle day, December 1-25 US-Eastern. The loop wakes two seconds
//! before midnight Eastern so threads appear right at 00:00; on startup
//! inside the window it catches up from day 1, skipping days that already
//! have a recorded thread.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

use crate::api::{ApiClient, RequestOptions};
use crate::cache::Cache;
use crate::discord::DiscordRest;
use crate::error::ServiceError;
use crate::models::{AocConfigListResponse, AocGuildConfig, AocThreadResponse, ServiceHealth};
use crate::schedulers::TaskHandle;
use crate::services::ServiceCore;

const AOC_MONTH: u32 = 12;
const AOC_START_DAY: u32 = 1;
const AOC_END_DAY: u32 = 25;

/// Post threads slightly early so they land right at midnight.
const EARLY_POST_SECONDS: i64 = 2;

/// Longest sleep between checks, for responsiveness outside the window.
const MAX_WAIT: Duration = Duration::from_secs(3600);

/// Source of the current instant. Injected so tests can pin time.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct AdventOfCodeScheduler {
    core: ServiceCore,
    rest: Arc<dyn DiscordRest>,
    clock: Arc<dyn Clock>,
    task: TaskHandle,
}

impl AdventOfCodeScheduler {
    pub fn new(
        api: Arc<dyn ApiClient>,
        cache: Option<Arc<dyn Cache>>,
        rest: Arc<dyn DiscordRest>,
    ) -> Self {
        Self::with_clock(api, cache, rest, Arc::new(SystemClock))
    }

    pub fn with_clock(
        api: Arc<dyn ApiClient>,
        cache: Option<Arc<dyn Cache>>,
        rest: Arc<dyn DiscordRest>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            core: ServiceCore::new(api, cache, "AdventOfCodeScheduler"),
            rest,
            clock,
            task: TaskHandle::new(),
        }
    }

    pub async fn initialize(self: &Arc<Self>) -> Result<(), ServiceError> {
        self.core.initialize()?;
        self.start().await;
        tracing::info!("Advent of Code scheduler initialized");
        Ok(())
    }

    pub async fn start(self: &Arc<Self>) {
        if !self.task.try_start() {
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop().await });
        self.task.attach(handle).await;
        tracing::info!("Started Advent of Code scheduler");
    }

    pub async fn cleanup(&self) {
        self.task.stop().await;
        self.core.cleanup().await;
        tracing::info!("Advent of Code scheduler cleaned up");
    }

    pub async fn health_check(&self) -> ServiceHealth {
        let status = if self.task.is_running() { "running" } else { "stopped" };
        let now_eastern = self.clock.now_utc().with_timezone(&New_York);
        let in_window = now_eastern.month() == AOC_MONTH && now_eastern.day() <= AOC_END_DAY;

        ServiceHealth::healthy(self.core.name(), None).with_details(serde_json::json!({
            "scheduler_status": status,
            "is_aoc_window": in_window,
            "current_eastern_time": now_eastern.to_rfc3339(),
        }))
    }

    async fn run_loop(self: Arc<Self>) {
        while self.task.is_running() {
            self.check_and_create_threads().await;
            let now_eastern = self.clock.now_utc().with_timezone(&New_York);
            tokio::time::sleep(duration_until_next_check(now_eastern)).await;
        }
    }

    /// One check: inside the December window, create any missing threads for
    /// days 1 through today in every configured guild.
    pub async fn check_and_create_threads(&self) {
        let now_eastern = self.clock.now_utc().with_timezone(&New_York);
        if now_eastern.month() != AOC_MONTH {
            return;
        }
        let current_day = now_eastern.day();
        if !(AOC_START_DAY..=AOC_END_DAY).contains(&current_day) {
            return;
        }
        let year = now_eastern.year();

        let configs = self.active_configs().await;
        if configs.is_empty() {
            tracing::debug!("No active Advent of Code configurations");
            return;
        }
        tracing::info!(
            "Checking Advent of Code threads for {year} day {current_day} across {} guilds",
            configs.len()
        );

        for config in configs {
            if let Err(e) = self.process_config(&config, year, current_day).await {
                tracing::error!(
                    "Failed to process Advent of Code config for guild {}: {e}",
                    config.guild_id
                );
            }
        }
    }

    /// Catch up one guild: create threads for each day up to `current_day`
    /// that has no recorded thread yet, oldest first.
    async fn process_config(
        &self,
        config: &AocGuildConfig,
        year: i32,
        current_day: u32,
    ) -> Result<(), ServiceError> {
        if let Some(config_year) = config.year {
            if config_year != year {
                return Ok(());
            }
        }
        let Some(forum_channel_id) = config.forum_channel_id.as_deref() else {
            tracing::warn!("No forum channel configured for guild {}", config.guild_id);
            return Ok(());
        };

        for day in AOC_START_DAY..=current_day {
            if self.posted_thread_exists(&config.guild_id, year, day).await {
                continue;
            }
            self.create_thread(&config.guild_id, forum_channel_id, year, day)
                .await?;
        }

        Ok(())
    }

    async fn create_thread(
        &self,
        guild_id: &str,
        forum_channel_id: &str,
        year: i32,
        day: u32,
    ) -> Result<(), ServiceError> {
        let title = format!("Day {day} - Advent of Code");
        let url = format!("https://adventofcode.com/{year}/day/{day}");
        let content = format!(
            "**Advent of Code {year} - Day {day}**\n\n\
             Today's challenge is live!\n\n\
             {url}\n\n\
             Share your solutions, discuss approaches, and help each other out. \
             Please use spoiler tags (`||spoiler||`) when discussing solutions!"
        );

        let thread = self
            .rest
            .create_forum_post(forum_channel_id, &title, &content)
            .await
            .map_err(|e| ServiceError::Internal(format!("failed to create thread: {e}")))?;

        tracing::info!("Created Advent of Code thread {} for guild {guild_id} day {day}", thread.id);

        // The thread exists even when the record write fails; log and move on.
        if let Err(e) = self.record_thread(guild_id, year, day, &thread.id, &title).await {
            tracing::error!("Failed to record Advent of Code thread for day {day}: {e}");
        }

        Ok(())
    }

    async fn active_configs(&self) -> Vec<AocGuildConfig> {
        let result = self
            .core
            .api()
            .get("/advent-of-code/active-configs", RequestOptions::new())
            .await
            .and_then(|r| r.json::<AocConfigListResponse>());

        match result {
            Ok(parsed) => parsed.configs,
            Err(e) => {
                tracing::error!("Failed to get active Advent of Code configs: {e}");
                Vec::new()
            }
        }
    }

    async fn posted_thread_exists(&self, guild_id: &str, year: i32, day: u32) -> bool {
        let result = self
            .core
            .api()
            .get(
                &format!("/advent-of-code/{guild_id}/threads/{year}/{day}"),
                RequestOptions::new(),
            )
            .await;

        match result {
            Ok(response) => response
                .json::<AocThreadResponse>()
                .map(|r| r.thread.is_some())
                .unwrap_or(false),
            Err(ServiceError::Api { status: 404, .. }) => false,
            Err(e) => {
                // An unknown answer must not cause a duplicate thread.
                tracing::error!("Failed to check posted thread for day {day}: {e}");
                true
            }
        }
    }

    async fn record_thread(
        &self,
        guild_id: &str,
        year: i32,
        day: u32,
        thread_id: &str,
        thread_title: &str,
    ) -> Result<(), ServiceError> {
        self.core
            .api()
            .post(
                &format!("/advent-of-code/{guild_id}/threads"),
                RequestOptions::new().body(serde_json::json!({
                    "year": year,
                    "day": day,
                    "thread_id": thread_id,
                    "thread_title": thread_title,
                })),
            )
            .await?;
        Ok(())
    }
}

/// How long to sleep before the next check.
///
/// Outside the December window the loop idles an hour at a time; inside it
/// targets the next midnight Eastern minus the early-post offset, capped at
/// an hour.
fn duration_until_next_check(now_eastern: DateTime<Tz>) -> Duration {
    if now_eastern.month() != AOC_MONTH || now_eastern.day() > AOC_END_DAY {
        return MAX_WAIT;
    }

    let tomorrow = now_eastern.date_naive() + chrono::Days::new(1);
    let midnight = New_York
        .from_local_datetime(&tomorrow.and_hms_opt(0, 0, 0).expect("valid midnight"))
        .earliest()
        .unwrap_or_else(|| now_eastern + chrono::Duration::hours(1));
    let target = midnight - chrono::Duration::seconds(EARLY_POST_SECONDS);

    let wait = (target - now_eastern)
        .to_std()
        .unwrap_or(Duration::from_secs(10));
    wait.clamp(Duration::from_secs(10), MAX_WAIT)
}
