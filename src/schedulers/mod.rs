//! Time-driven content schedulers.
//!
//! Every scheduler follows the same shape: a long-lived poll task fetches a
//! look-ahead window of jobs, claims each unseen job id, and spawns a
//! short-lived task that sleeps until the fire-at instant, executes the side
//! effect, marks the job done through the API, and releases the id.
//!
//! This module holds the pieces they share: the queued-jobs set, the poll-task
//! lifecycle, announcement formatting with Discord's length limit, the
//! per-channel send/pin retry ladders, and squad-channel resolution.

pub mod advent_of_code;
pub mod challenges;
pub mod quests;
pub mod repeating_messages;
pub mod scheduled_messages;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::api::{ApiClient, RequestOptions};
use crate::discord::{ActionButton, DiscordError, DiscordRest};
use crate::models::Squad;
use crate::util::truncate_chars;

/// Discord's hard message length limit.
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

/// Poll cadence for the fine-grained schedulers.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Look-ahead window the fine-grained schedulers request per poll.
pub const LOOKAHEAD_SECONDS: u64 = 45;

/// Cool-off before the second pass over channels that failed their first.
const FAILED_CHANNEL_COOLOFF: Duration = Duration::from_secs(30);

/// Ids of jobs whose fire-at delay is already scheduled in this process.
///
/// Claiming is the at-most-once guard within the look-ahead window; release
/// happens after the job task finishes, success or not.
#[derive(Default)]
pub struct QueuedJobs {
    ids: Mutex<HashSet<String>>,
}

impl QueuedJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an id. Returns false when it is already in flight.
    pub async fn claim(&self, id: &str) -> bool {
        self.ids.lock().await.insert(id.to_string())
    }

    pub async fn release(&self, id: &str) {
        self.ids.lock().await.remove(id);
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.ids.lock().await.contains(id)
    }

    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }
}

/// Lifecycle of a scheduler's main poll task.
pub struct TaskHandle {
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flip to running. Returns false when the task is already running.
    pub fn try_start(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    pub async fn attach(&self, handle: JoinHandle<()>) {
        *self.handle.lock().await = Some(handle);
    }

    /// Stop the task: clear the flag, cancel the task, await its termination.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// An active squad's announcement target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquadChannel {
    pub channel_id: String,
    pub squad_name: String,
    pub role_id: Option<String>,
}

/// Resolve the announcement channels of a guild's active squads.
///
/// Failures are logged and yield an empty list so one guild's trouble never
/// stalls a whole batch.
pub async fn squad_channels(api: &Arc<dyn ApiClient>, guild_id: &str) -> Vec<SquadChannel> {
    let result = api
        .get(
            &format!("/guilds/{guild_id}/squads"),
            RequestOptions::new().timeout(Duration::from_secs(10)),
        )
        .await
        .and_then(|r| r.json::<Vec<Squad>>());

    match result {
        Ok(squads) => squads
            .into_iter()
            .filter(|s| s.is_active)
            .filter_map(|s| {
                s.announcement_channel.map(|channel_id| SquadChannel {
                    channel_id,
                    squad_name: s.name,
                    role_id: Some(s.role_id),
                })
            })
            .collect(),
        Err(e) => {
            tracing::error!("Failed to get squad channels for guild {guild_id}: {e}");
            Vec::new()
        }
    }
}

/// Build an announcement: optional role mention, h1 title, description,
/// truncated so the whole message fits Discord's limit with a `...` suffix.
pub fn format_announcement(title: &str, description: &str, role_id: Option<&str>) -> String {
    let mention = match role_id {
        Some(role_id) => format!("<@&{role_id}>\n\n"),
        None => String::new(),
    };
    let header = format!("# {title}\n");

    let message = if description.is_empty() {
        format!("{mention}# {title}")
    } else {
        format!("{mention}{header}{description}")
    };
    if message.chars().count() <= DISCORD_MESSAGE_LIMIT {
        return message;
    }

    let budget = DISCORD_MESSAGE_LIMIT
        .saturating_sub(mention.chars().count())
        .saturating_sub(header.chars().count())
        .saturating_sub(3);
    format!("{mention}{header}{}...", truncate_chars(description, budget))
}

/// One channel delivery within a batch.
#[derive(Debug, Clone)]
pub struct ChannelSend {
    pub channel_id: String,
    pub content: String,
    pub buttons: Vec<ActionButton>,
}

/// Send to one channel with retry.
///
/// Terminal errors (unknown channel, missing permission) skip the channel
/// immediately; transient errors back off `base * 2^attempt`.
pub async fn send_with_retry(
    rest: &Arc<dyn DiscordRest>,
    send: &ChannelSend,
    pin: bool,
    max_retries: u32,
    base_delay: Duration,
) -> bool {
    for attempt in 0..=max_retries {
        match rest
            .create_message(&send.channel_id, &send.content, &send.buttons, true)
            .await
        {
            Ok(message) => {
                if pin {
                    pin_with_retry(rest, &message.channel_id, &message.id, 3).await;
                }
                return true;
            }
            Err(e) if e.is_terminal() => {
                tracing::error!("Channel {} is unusable, skipping: {e}", send.channel_id);
                return false;
            }
            Err(e) => {
                if attempt < max_retries {
                    let wait = base_delay * 2u32.pow(attempt);
                    tracing::warn!(
                        "Send to channel {} failed (attempt {}/{max_retries}), retrying in {wait:?}: {e}",
                        send.channel_id,
                        attempt + 1
                    );
                    tokio::time::sleep(wait).await;
                } else {
                    tracing::error!(
                        "Send to channel {} failed after {max_retries} retries: {e}",
                        send.channel_id
                    );
                }
            }
        }
    }
    false
}

/// Pin with its own retry ladder (2s, 4s, 8s).
///
/// Missing permission and over-long rate limits are terminal; there is no
/// point retrying either.
pub async fn pin_with_retry(
    rest: &Arc<dyn DiscordRest>,
    channel_id: &str,
    message_id: &str,
    max_retries: u32,
) {
    for attempt in 0..=max_retries {
        match rest.pin_message(channel_id, message_id).await {
            Ok(()) => return,
            Err(DiscordError::Forbidden(_)) => {
                tracing::warn!("No permission to pin in channel {channel_id}");
                return;
            }
            Err(DiscordError::RateLimitTooLong { retry_after }) => {
                tracing::warn!(
                    "Rate limit too long ({retry_after}s) pinning in channel {channel_id}"
                );
                return;
            }
            Err(e) => {
                if attempt < max_retries {
                    let wait = Duration::from_secs(2) * 2u32.pow(attempt);
                    tracing::warn!(
                        "Failed to pin message in {channel_id}, retrying in {wait:?}: {e}"
                    );
                    tokio::time::sleep(wait).await;
                } else {
                    tracing::error!(
                        "Failed to pin message {message_id} after {max_retries} retries: {e}"
                    );
                }
            }
        }
    }
}

/// Deliver a batch of channel sends: a first pass with the standard retry
/// ladder, then one cool-off pass over the failures with a longer ladder.
/// Returns the number of channels that got the message.
pub async fn deliver_batch(
    rest: &Arc<dyn DiscordRest>,
    sends: Vec<ChannelSend>,
    pin: bool,
) -> usize {
    let mut successes = 0;
    let mut failed: Vec<ChannelSend> = Vec::new();

    for send in sends {
        if send_with_retry(rest, &send, pin, 3, Duration::from_millis(1500)).await {
            successes += 1;
        } else {
            failed.push(send);
        }
    }

    if !failed.is_empty() {
        tracing::warn!("Retrying {} failed channels after cool-off", failed.len());
        tokio::time::sleep(FAILED_CHANNEL_COOLOFF).await;
        for send in &failed {
            if send_with_retry(rest, send, pin, 5, Duration::from_millis(1500)).await {
                successes += 1;
            }
        }
    }

    successes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::testing::{MockDiscordRest, SentCall};

    #[tokio::test]
    async fn test_queued_jobs_claim_once() {
        let queued = QueuedJobs::new();
        assert!(queued.claim("job-1").await);
        assert!(!queued.claim("job-1").await);
        assert!(queued.contains("job-1").await);

        queued.release("job-1").await;
        assert!(queued.claim("job-1").await);
        assert_eq!(queued.len().await, 1);
    }

    #[test]
    fn test_format_announcement_with_mention() {
        let message = format_announcement("New Challenge", "Solve it!", Some("555"));
        assert_eq!(message, "<@&555>\n\n# New Challenge\nSolve it!");
    }

    #[test]
    fn test_format_announcement_without_description() {
        assert_eq!(format_announcement("Ping", "", None), "# Ping");
    }

    #[test]
    fn test_format_announcement_truncates_to_limit() {
        let description = "x".repeat(3000);
        let message = format_announcement("Big", &description, Some("1234567890"));
        assert_eq!(message.chars().count(), DISCORD_MESSAGE_LIMIT);
        assert!(message.ends_with("..."));
        assert!(message.starts_with("<@&1234567890>\n\n# Big\n"));
    }

    #[tokio::test]
    async fn test_send_with_retry_skips_terminal_channels() {
        let rest = MockDiscordRest::new();
        rest.fail_channel("123", 10, || DiscordError::Forbidden("123".into()));
        let rest: Arc<dyn DiscordRest> = Arc::new(rest);

        let send = ChannelSend {
            channel_id: "123".into(),
            content: "hi".into(),
            buttons: Vec::new(),
        };
        // One attempt, no retries, no sleep.
        assert!(!send_with_retry(&rest, &send, false, 3, Duration::from_millis(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_with_retry_recovers_from_transient_errors() {
        let mock = MockDiscordRest::new();
        mock.fail_channel("123", 2, || DiscordError::Internal {
            status: 500,
            message: "oops".into(),
        });
        let rest: Arc<dyn DiscordRest> = Arc::new(mock);

        let send = ChannelSend {
            channel_id: "123".into(),
            content: "hi".into(),
            buttons: Vec::new(),
        };
        assert!(send_with_retry(&rest, &send, false, 3, Duration::from_millis(1500)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_batch_second_pass_after_cooloff() {
        let mock = MockDiscordRest::new();
        // Fails the full first pass (4 attempts), succeeds in the second.
        mock.fail_channel("200", 4, || DiscordError::Internal {
            status: 502,
            message: "bad gateway".into(),
        });
        let rest = Arc::new(mock);
        let dyn_rest: Arc<dyn DiscordRest> = rest.clone();

        let sends = vec![
            ChannelSend {
                channel_id: "100".into(),
                content: "a".into(),
                buttons: Vec::new(),
            },
            ChannelSend {
                channel_id: "200".into(),
                content: "b".into(),
                buttons: Vec::new(),
            },
        ];

        let successes = deliver_batch(&dyn_rest, sends, false).await;
        assert_eq!(successes, 2);
        assert_eq!(rest.messages_to("100"), 1);
        assert_eq!(rest.messages_to("200"), 1);
    }

    #[tokio::test]
    async fn test_deliver_batch_pins_when_asked() {
        let mock = MockDiscordRest::new();
        let rest = Arc::new(mock);
        let dyn_rest: Arc<dyn DiscordRest> = rest.clone();

        let sends = vec![ChannelSend {
            channel_id: "100".into(),
            content: "a".into(),
            buttons: Vec::new(),
        }];
        assert_eq!(deliver_batch(&dyn_rest, sends, true).await, 1);

        let calls = rest.calls();
        assert!(matches!(calls[0], SentCall::Message { .. }));
        assert!(matches!(calls[1], SentCall::Pin { .. }));
    }
}
