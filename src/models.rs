//! Domain models shared across services and schedulers.
//!
//! These mirror the backend API's JSON shapes. The API is the single source of
//! truth; everything here is a read-through copy or an operation result.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Anything exposing a Discord user id and a display name.
///
/// The transfer path accepts any such value instead of raw id/username pairs.
pub trait DiscordUser {
    fn id(&self) -> &str;
    fn display_name(&self) -> &str;
}

/// Plain owned implementation of [`DiscordUser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRef {
    pub id: String,
    pub display_name: String,
}

impl UserRef {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl DiscordUser for UserRef {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// Health status reported by a service or one of its dependencies.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub service_name: String,
    pub is_healthy: bool,
    pub response_time_ms: Option<f64>,
    pub last_check: DateTime<Utc>,
    pub details: serde_json::Value,
}

impl ServiceHealth {
    pub fn healthy(service_name: &str, response_time_ms: Option<f64>) -> Self {
        Self {
            service_name: service_name.to_string(),
            is_healthy: true,
            response_time_ms,
            last_check: Utc::now(),
            details: serde_json::Value::Null,
        }
    }

    pub fn unhealthy(service_name: &str, error: impl Into<String>) -> Self {
        Self {
            service_name: service_name.to_string(),
            is_healthy: false,
            response_time_ms: None,
            last_check: Utc::now(),
            details: serde_json::json!({ "error": error.into() }),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bytes economy
// ─────────────────────────────────────────────────────────────────────────────

/// Per-(guild, user) bytes account.
///
/// `balance == total_received - total_sent` for non-system accounts; the API
/// self-heals divergence from the transaction ledger on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BytesBalance {
    pub guild_id: String,
    pub user_id: String,
    pub balance: i64,
    pub total_received: i64,
    pub total_sent: i64,
    #[serde(default)]
    pub streak_count: i64,
    /// Civil date of the last daily claim.
    #[serde(default)]
    pub last_daily: Option<NaiveDate>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Immutable ledger entry. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BytesTransaction {
    pub id: Uuid,
    pub guild_id: String,
    pub giver_id: String,
    pub giver_username: String,
    pub receiver_id: String,
    pub receiver_username: String,
    pub amount: i64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Per-guild economy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BytesConfig {
    pub guild_id: String,
    pub starting_balance: i64,
    pub daily_amount: i64,
    pub max_transfer: i64,
    #[serde(default)]
    pub transfer_cooldown_hours: i64,
    /// Streak-day threshold -> multiplier.
    #[serde(default)]
    pub streak_bonuses: BTreeMap<u32, i64>,
}

/// One leaderboard row. Rank is 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub balance: i64,
    #[serde(default)]
    pub total_received: i64,
    #[serde(default)]
    pub streak_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LeaderboardUser {
    pub user_id: String,
    pub balance: i64,
    #[serde(default)]
    pub total_received: i64,
    #[serde(default)]
    pub streak_count: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LeaderboardResponse {
    #[serde(default)]
    pub users: Vec<LeaderboardUser>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransactionListResponse {
    #[serde(default)]
    pub transactions: Vec<BytesTransaction>,
}

/// Default-squad assignment that may accompany a first daily claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadAssignment {
    #[serde(default)]
    pub squad_id: Option<Uuid>,
    #[serde(default)]
    pub squad_name: Option<String>,
    #[serde(default)]
    pub role_id: Option<String>,
}

/// Outcome of a successful daily claim.
#[derive(Debug, Clone)]
pub struct DailyClaimResult {
    pub balance: BytesBalance,
    /// Bytes earned by this claim, multiplier already applied.
    pub earned: i64,
    pub streak: i64,
    pub multiplier: i64,
    /// Next midnight UTC.
    pub next_claim_at: Option<DateTime<Utc>>,
    pub squad_assignment: Option<SquadAssignment>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DailyClaimResponse {
    pub balance: BytesBalance,
    #[serde(default)]
    pub reward_amount: Option<i64>,
    #[serde(default = "default_multiplier")]
    pub streak_bonus: i64,
    #[serde(default)]
    pub next_claim_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub squad_assignment: Option<SquadAssignment>,
}

fn default_multiplier() -> i64 {
    1
}

/// Minimal view of the transaction created by a transfer.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionRef {
    pub id: Uuid,
    pub amount: i64,
    pub giver_id: String,
    pub receiver_id: String,
}

/// Outcome of a transfer attempt. Refusals are values, not errors.
#[derive(Debug, Clone, Default)]
pub struct TransferResult {
    pub success: bool,
    pub reason: Option<String>,
    pub transaction: Option<TransactionRef>,
    pub new_giver_balance: Option<i64>,
    pub new_receiver_balance: Option<i64>,
    pub is_cooldown_error: bool,
    /// Unix seconds at which the cooldown ends, when the API included it.
    pub cooldown_end_timestamp: Option<i64>,
}

impl TransferResult {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn cooldown(reason: impl Into<String>, end_timestamp: Option<i64>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
            is_cooldown_error: true,
            cooldown_end_timestamp: end_timestamp,
            ..Self::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Squads
// ─────────────────────────────────────────────────────────────────────────────

/// A named grouping of users tied to a Discord role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Squad {
    pub id: Uuid,
    pub guild_id: String,
    pub role_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Base cost in bytes before any sale discount.
    #[serde(default)]
    pub switch_cost: i64,
    #[serde(default)]
    pub max_members: Option<u32>,
    #[serde(default)]
    pub member_count: u32,
    pub is_active: bool,
    /// Default squads are auto-assigned and cannot be joined manually.
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub announcement_channel: Option<String>,
    /// Active join sale, percent off. 0 or absent means no sale.
    #[serde(default)]
    pub join_sale_percent: Option<u8>,
    /// Active switch sale, percent off. 0 or absent means no sale.
    #[serde(default)]
    pub switch_sale_percent: Option<u8>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Squad {
    pub fn is_full(&self) -> bool {
        self.max_members
            .map(|max| self.member_count >= max)
            .unwrap_or(false)
    }

    pub fn has_join_sale(&self) -> bool {
        self.join_sale_percent.map(|p| p > 0).unwrap_or(false)
    }

    pub fn has_switch_sale(&self) -> bool {
        self.switch_sale_percent.map(|p| p > 0).unwrap_or(false)
    }

    /// Cost to join from no squad, sale applied.
    pub fn current_join_cost(&self) -> i64 {
        discounted(self.switch_cost, self.join_sale_percent)
    }

    /// Cost to switch from another squad, sale applied.
    pub fn current_switch_cost(&self) -> i64 {
        discounted(self.switch_cost, self.switch_sale_percent)
    }
}

fn discounted(base: i64, sale_percent: Option<u8>) -> i64 {
    match sale_percent {
        Some(pct) if pct > 0 => base - (base * i64::from(pct.min(100))) / 100,
        _ => base,
    }
}

/// Membership entry within a squad.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadMember {
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SquadMembersResponse {
    #[serde(default)]
    pub members: Vec<SquadMember>,
}

/// A user's current squad membership. `squad: None` means unaffiliated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSquadResponse {
    pub user_id: String,
    #[serde(default)]
    pub squad: Option<Squad>,
    #[serde(default)]
    pub member_since: Option<DateTime<Utc>>,
}

impl UserSquadResponse {
    pub fn none(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            squad: None,
            member_since: None,
        }
    }

    pub fn is_in_squad(&self) -> bool {
        self.squad.is_some()
    }
}

/// Outcome of a join attempt. Refusals are values, not errors.
#[derive(Debug, Clone, Default)]
pub struct JoinSquadResult {
    pub success: bool,
    pub squad: Option<Squad>,
    pub previous_squad: Option<Squad>,
    pub cost: Option<i64>,
    pub new_balance: Option<i64>,
    pub reason: Option<String>,
}

impl JoinSquadResult {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn failure_with_cost(reason: impl Into<String>, cost: i64) -> Self {
        Self {
            cost: Some(cost),
            ..Self::failure(reason)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Campaigns
// ─────────────────────────────────────────────────────────────────────────────

/// Campaign summary from the challenge scoreboard.
#[derive(Debug, Clone, Deserialize)]
pub struct Campaign {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub num_challenges: i64,
    #[serde(default = "default_cadence_hours")]
    pub release_cadence_hours: i64,
}

fn default_cadence_hours() -> i64 {
    24
}

impl Campaign {
    /// Whether the campaign window covers `now`:
    /// `start <= now < start + num_challenges * cadence_hours`.
    pub fn is_running_at(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active || self.num_challenges <= 0 {
            return false;
        }
        let Some(start) = self.start_time else {
            return false;
        };
        let end = start + chrono::Duration::hours(self.num_challenges * self.release_cadence_hours);
        start <= now && now < end
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScoreboardResponse {
    #[serde(default)]
    pub campaign: Option<Campaign>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduled jobs
// ─────────────────────────────────────────────────────────────────────────────

/// A challenge due for announcement.
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeAnnouncement {
    pub id: Uuid,
    pub guild_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub release_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChallengeListResponse {
    #[serde(default)]
    pub challenges: Vec<ChallengeAnnouncement>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChallengeDetailResponse {
    pub challenge: Option<ChallengeAnnouncement>,
}

/// A quest due for announcement.
#[derive(Debug, Clone, Deserialize)]
pub struct QuestAnnouncement {
    pub id: Uuid,
    pub guild_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub release_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QuestListResponse {
    #[serde(default)]
    pub quests: Vec<QuestAnnouncement>,
}

/// A one-shot scheduled message.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduledMessage {
    pub id: Uuid,
    pub guild_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Alternate body for the announcement channels; falls back to description.
    #[serde(default)]
    pub announcement_channel_message: Option<String>,
    pub scheduled_time: DateTime<Utc>,
    #[serde(default)]
    pub announcement_channels: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScheduledMessageListResponse {
    #[serde(default)]
    pub scheduled_messages: Vec<ScheduledMessage>,
}

/// A repeating message due for its next send.
#[derive(Debug, Clone, Deserialize)]
pub struct RepeatingMessage {
    pub id: Uuid,
    pub guild_id: String,
    pub channel_id: String,
    /// Pre-formatted body, role mention included when configured.
    pub message_content: String,
    #[serde(default)]
    pub next_send_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RepeatingMessageListResponse {
    #[serde(default)]
    pub repeating_messages: Vec<RepeatingMessage>,
}

/// Per-guild Advent of Code configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AocGuildConfig {
    pub guild_id: String,
    #[serde(default)]
    pub forum_channel_id: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AocConfigListResponse {
    #[serde(default)]
    pub configs: Vec<AocGuildConfig>,
}

/// Record of a created AoC discussion thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AocThread {
    pub year: i32,
    pub day: u32,
    pub thread_id: String,
    pub thread_title: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AocThreadResponse {
    #[serde(default)]
    pub thread: Option<AocThread>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_parses_dates() {
        let json = serde_json::json!({
            "guild_id": "111111111111111111",
            "user_id": "222222222222222222",
            "balance": 100,
            "total_received": 150,
            "total_sent": 50,
            "streak_count": 5,
            "last_daily": "2024-01-14",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": null
        });

        let balance: BytesBalance = serde_json::from_value(json).unwrap();
        assert_eq!(balance.balance, 100);
        assert_eq!(
            balance.last_daily,
            Some(NaiveDate::from_ymd_opt(2024, 1, 14).unwrap())
        );
        assert!(balance.created_at.is_some());
        assert!(balance.updated_at.is_none());
        assert_eq!(balance.balance, balance.total_received - balance.total_sent);
    }

    #[test]
    fn test_config_parses_streak_bonuses() {
        let json = serde_json::json!({
            "guild_id": "111111111111111111",
            "starting_balance": 100,
            "daily_amount": 10,
            "max_transfer": 1000,
            "transfer_cooldown_hours": 24,
            "streak_bonuses": {"7": 2, "14": 4, "30": 10}
        });

        let config: BytesConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.streak_bonuses.get(&7), Some(&2));
        assert_eq!(config.streak_bonuses.get(&30), Some(&10));
    }

    #[test]
    fn test_squad_costs_with_sales() {
        let mut squad = sample_squad();
        squad.switch_cost = 100;
        assert_eq!(squad.current_join_cost(), 100);
        assert_eq!(squad.current_switch_cost(), 100);

        squad.switch_sale_percent = Some(25);
        assert_eq!(squad.current_switch_cost(), 75);
        assert!(squad.has_switch_sale());
        assert!(!squad.has_join_sale());

        squad.join_sale_percent = Some(50);
        assert_eq!(squad.current_join_cost(), 50);
    }

    #[test]
    fn test_squad_capacity() {
        let mut squad = sample_squad();
        squad.max_members = Some(2);
        squad.member_count = 1;
        assert!(!squad.is_full());
        squad.member_count = 2;
        assert!(squad.is_full());
        squad.max_members = None;
        assert!(!squad.is_full());
    }

    #[test]
    fn test_campaign_window() {
        let start = "2025-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let campaign = Campaign {
            name: Some("Winter".into()),
            is_active: true,
            start_time: Some(start),
            num_challenges: 5,
            release_cadence_hours: 24,
        };

        // Runs for 5 days from start.
        assert!(campaign.is_running_at(start));
        assert!(campaign.is_running_at(start + chrono::Duration::days(4)));
        assert!(!campaign.is_running_at(start + chrono::Duration::days(5)));
        assert!(!campaign.is_running_at(start - chrono::Duration::seconds(1)));

        let disabled = Campaign {
            is_active: false,
            ..campaign
        };
        assert!(!disabled.is_running_at(start));
    }

    fn sample_squad() -> Squad {
        Squad {
            id: Uuid::new_v4(),
            guild_id: "111111111111111111".into(),
            role_id: "333333333333333333".into(),
            name: "Rustaceans".into(),
            description: None,
            switch_cost: 50,
            max_members: None,
            member_count: 0,
            is_active: true,
            is_default: false,
            announcement_channel: None,
            join_sale_percent: None,
            switch_sale_percent: None,
            created_at: None,
            updated_at: None,
        }
    }
}
