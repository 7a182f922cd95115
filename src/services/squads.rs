//! Squad management service.
//!
//! Squad listing, membership lookups, and the join/leave flows with their
//! cost, capacity, and campaign-window rules.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{ApiClient, RequestOptions};
use crate::cache::Cache;
use crate::error::ServiceError;
use crate::models::{
    JoinSquadResult, ScoreboardResponse, Squad, SquadMember, SquadMembersResponse,
    UserSquadResponse,
};
use crate::services::ServiceCore;
use crate::util::format_thousands;

const CACHE_TTL_SQUADS: Duration = Duration::from_secs(300);
const CACHE_TTL_USER_SQUAD: Duration = Duration::from_secs(180);
const CACHE_TTL_SQUAD_MEMBERS: Duration = Duration::from_secs(120);

const READ_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// Membership payload from `GET /guilds/{gid}/squads/members/{uid}`.
#[derive(Debug, Deserialize)]
struct UserSquadApiResponse {
    #[serde(default)]
    squad: Option<Squad>,
    #[serde(default)]
    member_since: Option<DateTime<Utc>>,
}

/// Squad operations against the backend API.
pub struct SquadsService {
    core: ServiceCore,
    join_attempts: AtomicU64,
    leave_attempts: AtomicU64,
    member_lookups: AtomicU64,
}

impl SquadsService {
    pub fn new(api: Arc<dyn ApiClient>, cache: Option<Arc<dyn Cache>>) -> Self {
        Self {
            core: ServiceCore::new(api, cache, "SquadsService"),
            join_attempts: AtomicU64::new(0),
            leave_attempts: AtomicU64::new(0),
            member_lookups: AtomicU64::new(0),
        }
    }

    pub fn initialize(&self) -> Result<(), ServiceError> {
        self.core.initialize()
    }

    pub async fn cleanup(&self) {
        self.core.cleanup().await;
    }

    pub async fn health_check(&self) -> crate::models::ServiceHealth {
        self.core.health_check().await
    }

    /// List squads in a guild, ordered by name.
    pub async fn list_squads(
        &self,
        guild_id: &str,
        include_inactive: bool,
        use_cache: bool,
    ) -> Result<Vec<Squad>, ServiceError> {
        self.core.ensure_initialized()?;
        require_nonempty("guild_id", guild_id)?;

        let inactive_flag = include_inactive.to_string();
        let cache_key = self.core.cache_key(&["squads", guild_id, &inactive_flag]);
        if use_cache {
            if let Some(squads) = self.core.get_cached::<Vec<Squad>>(&cache_key).await {
                return Ok(squads);
            }
        }

        let mut options = RequestOptions::new().timeout(READ_TIMEOUT);
        if include_inactive {
            options = options.query("include_inactive", "true");
        }

        let response = self
            .core
            .api()
            .get(&format!("/guilds/{guild_id}/squads"), options)
            .await?;

        let mut squads: Vec<Squad> = response.json()?;
        squads.sort_by(|a, b| a.name.cmp(&b.name));

        if use_cache {
            self.core
                .set_cached(&cache_key, &squads, CACHE_TTL_SQUADS)
                .await;
        }

        Ok(squads)
    }

    /// Fetch one squad.
    pub async fn get_squad(
        &self,
        guild_id: &str,
        squad_id: Uuid,
        use_cache: bool,
    ) -> Result<Squad, ServiceError> {
        self.core.ensure_initialized()?;
        require_nonempty("guild_id", guild_id)?;

        let squad_str = squad_id.to_string();
        let cache_key = self.core.cache_key(&["squad", guild_id, &squad_str]);
        if use_cache {
            if let Some(squad) = self.core.get_cached::<Squad>(&cache_key).await {
                return Ok(squad);
            }
        }

        let response = self
            .core
            .api()
            .get(
                &format!("/guilds/{guild_id}/squads/{squad_id}"),
                RequestOptions::new().timeout(READ_TIMEOUT),
            )
            .await
            .map_err(|e| map_not_found(e, "squad", squad_str.clone()))?;

        let squad: Squad = response.json()?;

        if use_cache {
            self.core
                .set_cached(&cache_key, &squad, CACHE_TTL_SQUADS)
                .await;
        }

        Ok(squad)
    }

    /// Get a user's current membership. A 404 from the API is a valid result
    /// meaning "not in any squad" and is cached like any other answer.
    pub async fn get_user_squad(
        &self,
        guild_id: &str,
        user_id: &str,
        use_cache: bool,
    ) -> Result<UserSquadResponse, ServiceError> {
        self.core.ensure_initialized()?;
        require_nonempty("guild_id", guild_id)?;
        require_nonempty("user_id", user_id)?;

        let cache_key = self.core.cache_key(&["user_squad", guild_id, user_id]);
        if use_cache {
            if let Some(result) = self.core.get_cached::<UserSquadResponse>(&cache_key).await {
                return Ok(result);
            }
        }

        self.member_lookups.fetch_add(1, Ordering::Relaxed);

        let result = self
            .core
            .api()
            .get(
                &format!("/guilds/{guild_id}/squads/members/{user_id}"),
                RequestOptions::new().timeout(READ_TIMEOUT),
            )
            .await;

        let result = match result {
            Ok(response) => {
                let parsed: UserSquadApiResponse = response.json()?;
                UserSquadResponse {
                    user_id: user_id.to_string(),
                    squad: parsed.squad,
                    member_since: parsed.member_since,
                }
            }
            Err(ServiceError::Api { status: 404, .. }) => UserSquadResponse::none(user_id),
            Err(e) => return Err(e),
        };

        if use_cache {
            self.core
                .set_cached(&cache_key, &result, CACHE_TTL_USER_SQUAD)
                .await;
        }

        Ok(result)
    }

    /// Whether a challenge campaign is currently running for this guild.
    ///
    /// Any parse or network failure reports "not running" so an unreachable
    /// scoreboard never blocks squad mutations.
    pub async fn check_running_campaign(&self, guild_id: &str) -> bool {
        let result = self
            .core
            .api()
            .get(
                "/challenges/scoreboard",
                RequestOptions::new()
                    .timeout(READ_TIMEOUT)
                    .query("guild_id", guild_id),
            )
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Failed to check campaigns for guild {guild_id}: {e}");
                return false;
            }
        };

        let scoreboard: ScoreboardResponse = match response.json() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Failed to parse scoreboard for guild {guild_id}: {e}");
                return false;
            }
        };

        match scoreboard.campaign {
            Some(campaign) if campaign.is_running_at(Utc::now()) => {
                tracing::info!(
                    "Running campaign found for guild {guild_id}: {}",
                    campaign.name.as_deref().unwrap_or("unnamed")
                );
                true
            }
            _ => false,
        }
    }

    /// Join a squad.
    ///
    /// The refusal cases (campaign window, inactive/default/full target,
    /// duplicate membership, insufficient balance) come back as unsuccessful
    /// results; only transport and validation problems are errors.
    pub async fn join_squad(
        &self,
        guild_id: &str,
        user_id: &str,
        squad_id: Uuid,
        current_balance: i64,
        username: Option<&str>,
    ) -> Result<JoinSquadResult, ServiceError> {
        self.core.ensure_initialized()?;
        require_nonempty("guild_id", guild_id)?;
        require_nonempty("user_id", user_id)?;
        if current_balance < 0 {
            return Err(ServiceError::Validation {
                field: "current_balance",
                message: "Balance cannot be negative".to_string(),
            });
        }

        self.join_attempts.fetch_add(1, Ordering::Relaxed);

        let user_squad = self.get_user_squad(guild_id, user_id, false).await?;
        let current_squad = user_squad.squad;

        // Campaign window: competitive-squad members stay put, unaffiliated
        // users wait; only default-squad members may move.
        if self.check_running_campaign(guild_id).await {
            match &current_squad {
                Some(squad) if !squad.is_default => {
                    return Ok(JoinSquadResult::failure(
                        "Squad switching is disabled during active challenge campaigns \
                         to prevent spying on other squads.",
                    ));
                }
                None => {
                    return Ok(JoinSquadResult::failure(
                        "Squad joining is disabled during active challenge campaigns. \
                         Members must remain unaffiliated until the campaign ends.",
                    ));
                }
                Some(_) => {}
            }
        }

        let target_squad = match self.get_squad(guild_id, squad_id, true).await {
            Ok(squad) => squad,
            Err(ServiceError::NotFound { .. }) => {
                return Ok(JoinSquadResult::failure("Squad not found!"));
            }
            Err(e) => return Err(e),
        };

        if !target_squad.is_active {
            return Ok(JoinSquadResult::failure(format!(
                "The {} squad is currently inactive.",
                target_squad.name
            )));
        }
        if target_squad.is_default {
            return Ok(JoinSquadResult::failure(format!(
                "Cannot manually join the {} squad. This is the default squad - members \
                 are automatically assigned when they earn bytes.",
                target_squad.name
            )));
        }
        if current_squad.as_ref().map(|s| s.id) == Some(squad_id) {
            return Ok(JoinSquadResult::failure(format!(
                "You're already in the {} squad!",
                target_squad.name
            )));
        }
        if target_squad.is_full() {
            return Ok(JoinSquadResult::failure(format!(
                "The {} squad is full! (Maximum: {} members)",
                target_squad.name,
                target_squad.max_members.unwrap_or(0)
            )));
        }

        let is_switching = current_squad.is_some();
        let join_cost = if is_switching {
            target_squad.current_switch_cost()
        } else {
            target_squad.current_join_cost()
        };

        if join_cost > current_balance {
            let action = if is_switching { "Switching to" } else { "Joining" };
            let cost_message = sale_cost_display(&target_squad, is_switching, join_cost);
            return Ok(JoinSquadResult::failure_with_cost(
                format!(
                    "Insufficient bytes! {action} the {} squad costs {cost_message}, \
                     but you only have {} bytes.",
                    target_squad.name,
                    format_thousands(current_balance)
                ),
                join_cost,
            ));
        }

        let join_body = serde_json::json!({
            "user_id": user_id,
            "username": username,
        });
        let join_path = format!("/guilds/{guild_id}/squads/{squad_id}/join");

        let mut join_result = self
            .core
            .api()
            .post(
                &join_path,
                RequestOptions::new()
                    .timeout(WRITE_TIMEOUT)
                    .body(join_body.clone()),
            )
            .await;

        // Stale membership on the API side: leave the old squad and retry once.
        let membership_conflict = matches!(
            &join_result,
            Err(ServiceError::Api { message, .. })
                if message.to_lowercase().contains("already in squad")
        );
        if membership_conflict {
            let Some(old_squad) = &current_squad else {
                return Ok(JoinSquadResult::failure(
                    "You're already in a squad, but we couldn't identify it!",
                ));
            };

            tracing::info!(
                "Leaving squad {} before joining {} for user {user_id}",
                old_squad.name,
                target_squad.name
            );
            if let Err(e) = self.leave_squad(guild_id, user_id).await {
                return Ok(JoinSquadResult::failure(format!(
                    "Failed to leave {} before joining {}: {e}",
                    old_squad.name, target_squad.name
                )));
            }

            join_result = self
                .core
                .api()
                .post(
                    &join_path,
                    RequestOptions::new().timeout(WRITE_TIMEOUT).body(join_body),
                )
                .await;
        }

        if let Err(error) = join_result {
            return match error {
                ServiceError::Api { message, .. } => {
                    let lowered = message.to_lowercase();
                    if lowered.contains("squad is full") {
                        Ok(JoinSquadResult::failure(format!(
                            "The {} squad is full!",
                            target_squad.name
                        )))
                    } else if lowered.contains("insufficient") {
                        Ok(JoinSquadResult::failure_with_cost(
                            "Insufficient bytes for squad switch!",
                            join_cost,
                        ))
                    } else {
                        Ok(JoinSquadResult::failure(message))
                    }
                }
                other => Err(other),
            };
        }

        // The join deducted the cost server-side; read the fresh balance and
        // fall back to arithmetic when the read fails.
        let new_balance = if join_cost > 0 {
            match self
                .core
                .api()
                .get(
                    &format!("/guilds/{guild_id}/bytes/balance/{user_id}"),
                    RequestOptions::new().timeout(READ_TIMEOUT),
                )
                .await
                .and_then(|r| r.json::<crate::models::BytesBalance>())
            {
                Ok(balance) => balance.balance,
                Err(e) => {
                    tracing::warn!("Failed to fetch updated balance after squad join: {e}");
                    current_balance - join_cost
                }
            }
        } else {
            current_balance
        };

        self.invalidate_user_squad_cache(guild_id, user_id).await;
        self.invalidate_squad_cache(guild_id, squad_id).await;
        if let Some(old_squad) = &current_squad {
            self.invalidate_squad_cache(guild_id, old_squad.id).await;
        }
        if join_cost > 0 {
            // Cross-service keys: the deduction changed the bytes balance.
            self.core
                .invalidate(&format!("bytesservice:balance:{guild_id}:{user_id}"))
                .await;
            self.core
                .invalidate_pattern(&format!("bytesservice:leaderboard:{guild_id}:*"))
                .await;
        }

        Ok(JoinSquadResult {
            success: true,
            squad: Some(target_squad),
            previous_squad: current_squad,
            cost: Some(join_cost),
            new_balance: Some(new_balance),
            reason: None,
        })
    }

    /// Leave the current squad.
    pub async fn leave_squad(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<UserSquadResponse, ServiceError> {
        self.core.ensure_initialized()?;
        require_nonempty("guild_id", guild_id)?;
        require_nonempty("user_id", user_id)?;

        self.leave_attempts.fetch_add(1, Ordering::Relaxed);

        let user_squad = self.get_user_squad(guild_id, user_id, false).await?;
        let Some(current_squad) = user_squad.squad else {
            return Err(ServiceError::NotInSquad);
        };

        let result = self
            .core
            .api()
            .delete(
                &format!("/guilds/{guild_id}/squads/leave"),
                RequestOptions::new()
                    .timeout(READ_TIMEOUT)
                    .body(serde_json::json!({ "user_id": user_id })),
            )
            .await;

        match result {
            Ok(_) => {}
            Err(ServiceError::Api { status: 404, .. }) => return Err(ServiceError::NotInSquad),
            Err(e) => return Err(e),
        }

        self.invalidate_user_squad_cache(guild_id, user_id).await;
        self.invalidate_squad_cache(guild_id, current_squad.id).await;

        Ok(UserSquadResponse::none(user_id))
    }

    /// List a squad's members, ordered by join date.
    pub async fn get_squad_members(
        &self,
        guild_id: &str,
        squad_id: Uuid,
        use_cache: bool,
    ) -> Result<Vec<SquadMember>, ServiceError> {
        self.core.ensure_initialized()?;
        require_nonempty("guild_id", guild_id)?;

        let squad_str = squad_id.to_string();
        let cache_key = self.core.cache_key(&["squad_members", guild_id, &squad_str]);
        if use_cache {
            if let Some(members) = self.core.get_cached::<Vec<SquadMember>>(&cache_key).await {
                return Ok(members);
            }
        }

        let response = self
            .core
            .api()
            .get(
                &format!("/guilds/{guild_id}/squads/{squad_id}/members"),
                RequestOptions::new().timeout(READ_TIMEOUT),
            )
            .await
            .map_err(|e| map_not_found(e, "squad", squad_str.clone()))?;

        let parsed: SquadMembersResponse = response.json()?;
        let mut members = parsed.members;
        members.sort_by_key(|m| m.joined_at);

        if use_cache {
            self.core
                .set_cached(&cache_key, &members, CACHE_TTL_SQUAD_MEMBERS)
                .await;
        }

        Ok(members)
    }

    /// Plain operation counters.
    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "service_name": self.core.name(),
            "total_join_attempts": self.join_attempts.load(Ordering::Relaxed),
            "total_leave_attempts": self.leave_attempts.load(Ordering::Relaxed),
            "total_member_lookups": self.member_lookups.load(Ordering::Relaxed),
            "cache_enabled": self.core.has_cache(),
        })
    }

    async fn invalidate_user_squad_cache(&self, guild_id: &str, user_id: &str) {
        let key = self.core.cache_key(&["user_squad", guild_id, user_id]);
        self.core.invalidate(&key).await;
    }

    async fn invalidate_squad_cache(&self, guild_id: &str, squad_id: Uuid) {
        let squad_str = squad_id.to_string();
        let key = self.core.cache_key(&["squad", guild_id, &squad_str]);
        self.core.invalidate(&key).await;

        let members_key = self.core.cache_key(&["squad_members", guild_id, &squad_str]);
        self.core.invalidate(&members_key).await;

        let list_pattern = self.core.cache_key(&["squads", guild_id, "*"]);
        self.core.invalidate_pattern(&list_pattern).await;
    }
}

/// Render the join/switch cost, showing the strike-through sale form when a
/// sale is active: `~~100~~ **75** bytes (25% off sale!)`.
fn sale_cost_display(squad: &Squad, is_switching: bool, cost: i64) -> String {
    let (has_sale, discount) = if is_switching {
        (squad.has_switch_sale(), squad.switch_sale_percent)
    } else {
        (squad.has_join_sale(), squad.join_sale_percent)
    };

    if has_sale {
        format!(
            "~~{}~~ **{}** bytes ({}% off sale!)",
            format_thousands(squad.switch_cost),
            format_thousands(cost),
            discount.unwrap_or(0)
        )
    } else {
        format!("{} bytes", format_thousands(cost))
    }
}

fn require_nonempty(field: &'static str, value: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        Err(ServiceError::Validation {
            field,
            message: format!("{field} is required"),
        })
    } else {
        Ok(())
    }
}

fn map_not_found(
    error: ServiceError,
    resource_type: &'static str,
    resource_id: String,
) -> ServiceError {
    match error {
        ServiceError::Api { status: 404, .. } => ServiceError::NotFound {
            resource_type,
            resource_id,
        },
        other => other,
    }
}
