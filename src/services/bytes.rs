//! Bytes economy service.
//!
//! Balance lookups, daily claims with streak math, peer transfers,
//! leaderboards, transaction history, and the admin streak reset. Reads go
//! through the cache when asked; every mutation invalidates the affected keys
//! after the API write succeeds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::api::{ApiClient, RequestOptions};
use crate::cache::Cache;
use crate::error::{sanitize_error_message, ServiceError};
use crate::models::{
    BytesBalance, BytesConfig, BytesTransaction, DailyClaimResponse, DailyClaimResult,
    DiscordUser, LeaderboardEntry, LeaderboardResponse, TransactionListResponse, TransactionRef,
    TransferResult,
};
use crate::services::streak::multiplier_for;
use crate::services::ServiceCore;

const CACHE_TTL_BALANCE: Duration = Duration::from_secs(300);
const CACHE_TTL_LEADERBOARD: Duration = Duration::from_secs(60);
const CACHE_TTL_CONFIG: Duration = Duration::from_secs(600);
const CACHE_TTL_TRANSACTION_HISTORY: Duration = Duration::from_secs(120);

const READ_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// Hard ceiling on a single transfer, independent of guild config.
const MAX_TRANSFER_AMOUNT: i64 = 10_000;

/// Bytes economy operations against the backend API.
pub struct BytesService {
    core: ServiceCore,
    balance_requests: AtomicU64,
    daily_claims: AtomicU64,
    transfers: AtomicU64,
}

impl BytesService {
    pub fn new(api: Arc<dyn ApiClient>, cache: Option<Arc<dyn Cache>>) -> Self {
        Self {
            core: ServiceCore::new(api, cache, "BytesService"),
            balance_requests: AtomicU64::new(0),
            daily_claims: AtomicU64::new(0),
            transfers: AtomicU64::new(0),
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

    /// Get a user's balance, optionally through the cache.
    pub async fn get_balance(
        &self,
        guild_id: &str,
        user_id: &str,
        use_cache: bool,
    ) -> Result<BytesBalance, ServiceError> {
        self.core.ensure_initialized()?;
        validate_discord_id("guild_id", guild_id)?;
        validate_discord_id("user_id", user_id)?;

        let cache_key = self.core.cache_key(&["balance", guild_id, user_id]);
        if use_cache {
            if let Some(balance) = self.core.get_cached::<BytesBalance>(&cache_key).await {
                tracing::debug!("Cache hit for balance {guild_id}:{user_id}");
                return Ok(balance);
            }
        }

        self.balance_requests.fetch_add(1, Ordering::Relaxed);

        let response = self
            .core
            .api()
            .get(
                &format!("/guilds/{guild_id}/bytes/balance/{user_id}"),
                RequestOptions::new().timeout(READ_TIMEOUT),
            )
            .await
            .map_err(|e| map_not_found(e, "user_balance", format!("{guild_id}:{user_id}")))?;

        let balance: BytesBalance = response.json().map_err(internal)?;

        if use_cache {
            self.core
                .set_cached(&cache_key, &balance, CACHE_TTL_BALANCE)
                .await;
        }

        Ok(balance)
    }

    /// Claim the daily reward. The API performs the claim atomically; a
    /// duplicate on the same civil day surfaces as `AlreadyClaimed`.
    pub async fn claim_daily(
        &self,
        guild_id: &str,
        user_id: &str,
        username: &str,
    ) -> Result<DailyClaimResult, ServiceError> {
        self.core.ensure_initialized()?;
        require_nonempty("guild_id", guild_id)?;
        require_nonempty("user_id", user_id)?;
        require_nonempty("username", username)?;

        self.daily_claims.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Daily claim for {user_id} in guild {guild_id}");

        let result = self
            .core
            .api()
            .post(
                &format!("/guilds/{guild_id}/bytes/daily"),
                RequestOptions::new()
                    .timeout(WRITE_TIMEOUT)
                    .body(serde_json::json!({
                        "user_id": user_id,
                        "username": username,
                    })),
            )
            .await;

        let response = match result {
            Ok(response) => response,
            Err(ServiceError::Api { status: 409, .. }) => {
                return Err(ServiceError::AlreadyClaimed {
                    next_claim_at: None,
                });
            }
            Err(ServiceError::Api { message, .. })
                if message.to_lowercase().contains("already been claimed") =>
            {
                return Err(ServiceError::AlreadyClaimed {
                    next_claim_at: None,
                });
            }
            Err(e) => return Err(e),
        };

        let claim: DailyClaimResponse = response.json().map_err(internal)?;
        let streak = claim.balance.streak_count;

        let result = DailyClaimResult {
            earned: claim.reward_amount.unwrap_or(0),
            streak,
            multiplier: claim.streak_bonus,
            next_claim_at: claim.next_claim_at,
            squad_assignment: claim.squad_assignment,
            balance: claim.balance,
        };

        self.invalidate_balance_cache(guild_id, user_id).await;
        self.invalidate_leaderboard_cache(guild_id).await;

        Ok(result)
    }

    /// Transfer bytes between two users.
    pub async fn transfer_bytes(
        &self,
        guild_id: &str,
        giver: &dyn DiscordUser,
        receiver: &dyn DiscordUser,
        amount: i64,
        reason: Option<&str>,
    ) -> Result<TransferResult, ServiceError> {
        self.transfer_bytes_by_id(
            guild_id,
            giver.id(),
            giver.display_name(),
            receiver.id(),
            receiver.display_name(),
            amount,
            reason,
        )
        .await
    }

    /// Transfer bytes by raw ids and usernames.
    ///
    /// Preconditions are checked in order and each failure short-circuits:
    /// self-send, amount bounds, then an uncached giver-balance check.
    #[allow(clippy::too_many_arguments)]
    pub async fn transfer_bytes_by_id(
        &self,
        guild_id: &str,
        giver_id: &str,
        giver_username: &str,
        receiver_id: &str,
        receiver_username: &str,
        amount: i64,
        reason: Option<&str>,
    ) -> Result<TransferResult, ServiceError> {
        self.core.ensure_initialized()?;
        require_nonempty("guild_id", guild_id)?;
        require_nonempty("giver_id", giver_id)?;
        require_nonempty("receiver_id", receiver_id)?;
        require_nonempty("giver_username", giver_username)?;
        require_nonempty("receiver_username", receiver_username)?;

        if giver_id == receiver_id {
            return Ok(TransferResult::failure("You can't send bytes to yourself!"));
        }
        if amount <= 0 {
            return Ok(TransferResult::failure("Transfer amount must be positive!"));
        }
        if amount > MAX_TRANSFER_AMOUNT {
            return Ok(TransferResult::failure(
                "Transfer amount too large! Maximum is 10,000 bytes.",
            ));
        }

        self.transfers.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "Transfer of {amount} bytes from {giver_id} to {receiver_id} in guild {guild_id}"
        );

        let giver_balance = self.get_balance(guild_id, giver_id, false).await?;
        if giver_balance.balance < amount {
            return Err(ServiceError::InsufficientBalance {
                required: amount,
                available: giver_balance.balance,
                operation: "transfer",
            });
        }

        let mut body = serde_json::json!({
            "giver_id": giver_id,
            "giver_username": giver_username,
            "receiver_id": receiver_id,
            "receiver_username": receiver_username,
            "amount": amount,
        });
        if let Some(reason) = reason {
            let trimmed: String = reason.chars().take(200).collect();
            body["reason"] = serde_json::Value::String(trimmed);
        }

        let result = self
            .core
            .api()
            .post(
                &format!("/guilds/{guild_id}/bytes/transactions"),
                RequestOptions::new().timeout(WRITE_TIMEOUT).body(body),
            )
            .await;

        let response = match result {
            Ok(response) => response,
            Err(ServiceError::Api { message, .. }) => {
                let lowered = message.to_lowercase();
                if lowered.contains("insufficient balance") {
                    return Err(ServiceError::InsufficientBalance {
                        required: amount,
                        available: giver_balance.balance,
                        operation: "transfer",
                    });
                }
                if lowered.contains("cooldown active") {
                    let (reason, end_timestamp) = parse_cooldown(&message);
                    return Ok(TransferResult::cooldown(reason, end_timestamp));
                }
                // "exceeds maximum limit" and any other refusal keep the
                // server's wording.
                return Ok(TransferResult::failure(message));
            }
            Err(e) => return Err(e),
        };

        let transaction: TransactionRef = response.json().map_err(internal)?;
        let new_giver_balance = giver_balance.balance - amount;

        // Best effort: the transfer already happened, a failed read here
        // must not fail it.
        let new_receiver_balance = match self.get_balance(guild_id, receiver_id, false).await {
            Ok(balance) => Some(balance.balance),
            Err(_) => None,
        };

        self.invalidate_balance_cache(guild_id, giver_id).await;
        self.invalidate_balance_cache(guild_id, receiver_id).await;
        self.invalidate_leaderboard_cache(guild_id).await;
        self.invalidate_transaction_history_cache(guild_id).await;

        Ok(TransferResult {
            success: true,
            reason: None,
            transaction: Some(transaction),
            new_giver_balance: Some(new_giver_balance),
            new_receiver_balance,
            is_cooldown_error: false,
            cooldown_end_timestamp: None,
        })
    }

    /// Get the guild's economy configuration.
    pub async fn get_config(
        &self,
        guild_id: &str,
        use_cache: bool,
    ) -> Result<BytesConfig, ServiceError> {
        self.core.ensure_initialized()?;
        require_nonempty("guild_id", guild_id)?;

        let cache_key = self.core.cache_key(&["config", guild_id]);
        if use_cache {
            if let Some(config) = self.core.get_cached::<BytesConfig>(&cache_key).await {
                return Ok(config);
            }
        }

        let response = self
            .core
            .api()
            .get(
                &format!("/guilds/{guild_id}/bytes/config"),
                RequestOptions::new().timeout(READ_TIMEOUT),
            )
            .await
            .map_err(|e| map_not_found(e, "guild_config", guild_id.to_string()))?;

        let config: BytesConfig = response.json().map_err(internal)?;

        if use_cache {
            self.core
                .set_cached(&cache_key, &config, CACHE_TTL_CONFIG)
                .await;
        }

        Ok(config)
    }

    /// Get the guild leaderboard, top `limit` entries with 1-based ranks.
    pub async fn get_leaderboard(
        &self,
        guild_id: &str,
        limit: usize,
        use_cache: bool,
    ) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        self.core.ensure_initialized()?;
        require_nonempty("guild_id", guild_id)?;
        if limit == 0 || limit > 100 {
            return Err(ServiceError::Validation {
                field: "limit",
                message: "Limit must be between 1 and 100".to_string(),
            });
        }

        let limit_str = limit.to_string();
        let cache_key = self.core.cache_key(&["leaderboard", guild_id, &limit_str]);
        if use_cache {
            if let Some(entries) = self
                .core
                .get_cached::<Vec<LeaderboardEntry>>(&cache_key)
                .await
            {
                return Ok(entries);
            }
        }

        let response = self
            .core
            .api()
            .get(
                &format!("/guilds/{guild_id}/bytes/leaderboard"),
                RequestOptions::new()
                    .timeout(READ_TIMEOUT)
                    .query("limit", limit_str.clone()),
            )
            .await?;

        let parsed: LeaderboardResponse = response.json().map_err(internal)?;
        let entries: Vec<LeaderboardEntry> = parsed
            .users
            .into_iter()
            .enumerate()
            .map(|(idx, user)| LeaderboardEntry {
                rank: idx + 1,
                user_id: user.user_id,
                balance: user.balance,
                total_received: user.total_received,
                streak_count: user.streak_count,
            })
            .collect();

        if use_cache {
            self.core
                .set_cached(&cache_key, &entries, CACHE_TTL_LEADERBOARD)
                .await;
        }

        Ok(entries)
    }

    /// Get transaction history for the guild or one user, newest first.
    pub async fn get_transaction_history(
        &self,
        guild_id: &str,
        user_id: Option<&str>,
        limit: usize,
        use_cache: bool,
    ) -> Result<Vec<BytesTransaction>, ServiceError> {
        self.core.ensure_initialized()?;
        require_nonempty("guild_id", guild_id)?;
        if limit == 0 || limit > 100 {
            return Err(ServiceError::Validation {
                field: "limit",
                message: "Limit must be between 1 and 100".to_string(),
            });
        }

        let limit_str = limit.to_string();
        let user_segment = user_id.unwrap_or("all");
        let cache_key =
            self.core
                .cache_key(&["transactions", guild_id, user_segment, &limit_str]);
        if use_cache {
            if let Some(transactions) = self
                .core
                .get_cached::<Vec<BytesTransaction>>(&cache_key)
                .await
            {
                return Ok(transactions);
            }
        }

        let mut options = RequestOptions::new()
            .timeout(READ_TIMEOUT)
            .query("limit", limit_str.clone());
        if let Some(user_id) = user_id {
            options = options.query("user_id", user_id);
        }

        let response = self
            .core
            .api()
            .get(&format!("/guilds/{guild_id}/bytes/transactions"), options)
            .await?;

        let parsed: TransactionListResponse = response.json().map_err(internal)?;

        if use_cache {
            self.core
                .set_cached(&cache_key, &parsed.transactions, CACHE_TTL_TRANSACTION_HISTORY)
                .await;
        }

        Ok(parsed.transactions)
    }

    /// Reset a user's streak. Authorization is the caller's concern; the
    /// admin id is forwarded for audit only.
    pub async fn reset_streak(
        &self,
        guild_id: &str,
        user_id: &str,
        admin_id: &str,
    ) -> Result<BytesBalance, ServiceError> {
        self.core.ensure_initialized()?;
        require_nonempty("guild_id", guild_id)?;
        require_nonempty("user_id", user_id)?;
        require_nonempty("admin_id", admin_id)?;

        tracing::info!("Streak reset for {user_id} in guild {guild_id} by admin {admin_id}");

        let response = self
            .core
            .api()
            .post(
                &format!("/guilds/{guild_id}/bytes/reset-streak/{user_id}"),
                RequestOptions::new().timeout(READ_TIMEOUT),
            )
            .await
            .map_err(|e| map_not_found(e, "user_balance", format!("{guild_id}:{user_id}")))?;

        let balance: BytesBalance = response.json().map_err(internal)?;
        self.invalidate_balance_cache(guild_id, user_id).await;
        Ok(balance)
    }

    /// Streak multiplier for a guild's bonus table.
    pub fn calculate_multiplier(config: &BytesConfig, streak: i64) -> i64 {
        multiplier_for(streak, &config.streak_bonuses)
    }

    /// Plain operation counters.
    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "service_name": self.core.name(),
            "total_balance_requests": self.balance_requests.load(Ordering::Relaxed),
            "total_daily_claims": self.daily_claims.load(Ordering::Relaxed),
            "total_transfers": self.transfers.load(Ordering::Relaxed),
            "cache_enabled": self.core.has_cache(),
        })
    }

    async fn invalidate_balance_cache(&self, guild_id: &str, user_id: &str) {
        let key = self.core.cache_key(&["balance", guild_id, user_id]);
        self.core.invalidate(&key).await;
    }

    async fn invalidate_leaderboard_cache(&self, guild_id: &str) {
        let pattern = self.core.cache_key(&["leaderboard", guild_id, "*"]);
        self.core.invalidate_pattern(&pattern).await;
    }

    async fn invalidate_transaction_history_cache(&self, guild_id: &str) {
        let pattern = self.core.cache_key(&["transactions", guild_id, "*"]);
        self.core.invalidate_pattern(&pattern).await;
    }
}

/// Validate a Discord snowflake-shaped id: digits only, plausible length, no
/// injection-shaped substrings.
pub fn validate_discord_id(field: &'static str, value: &str) -> Result<(), ServiceError> {
    let invalid = || ServiceError::Validation {
        field,
        message: format!("Invalid {field} format"),
    };

    if value.trim().is_empty() {
        return Err(ServiceError::Validation {
            field,
            message: format!("{field} is required"),
        });
    }

    const MALICIOUS: &[&str] = &[
        "';", "'--", "DROP", "SELECT", "INSERT", "UPDATE", "DELETE", "<SCRIPT", "JAVASCRIPT:",
        "${", "../", "\\X00", "\\X01", "\\X02",
    ];
    let upper = value.to_uppercase();
    if MALICIOUS.iter().any(|pat| upper.contains(pat)) {
        return Err(invalid());
    }

    if !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    // Snowflakes are ~18 digits; leave slack for edge cases.
    if value.len() < 10 || value.len() > 100 {
        return Err(invalid());
    }

    Ok(())
}

/// Split an API cooldown message of the form `"message|unix_seconds"`.
///
/// On a parse failure the whole message is kept and no timestamp is returned.
pub fn parse_cooldown(message: &str) -> (String, Option<i64>) {
    match message.rsplit_once('|') {
        Some((text, timestamp)) => match timestamp.trim().parse::<i64>() {
            Ok(unix) => (text.to_string(), Some(unix)),
            Err(_) => {
                tracing::warn!("Failed to parse cooldown timestamp: {timestamp}");
                (message.to_string(), None)
            }
        },
        None => (message.to_string(), None),
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

fn internal(error: ServiceError) -> ServiceError {
    match error {
        e @ (ServiceError::Api { .. } | ServiceError::Network(_)) => {
            ServiceError::Internal(sanitize_error_message(&e.to_string()))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::MockApiClient;
    use crate::api::HttpMethod;
    use crate::cache::MemoryCache;
    use crate::models::UserRef;

    const GUILD: &str = "111111111111111111";
    const USER: &str = "222222222222222222";
    const OTHER: &str = "333333333333333333";

    fn service() -> (BytesService, Arc<MockApiClient>, Arc<MemoryCache>) {
        let api = Arc::new(MockApiClient::new());
        let cache = Arc::new(MemoryCache::default());
        let service = BytesService::new(api.clone(), Some(cache.clone()));
        service.initialize().unwrap();
        (service, api, cache)
    }

    fn balance_json(user_id: &str, balance: i64) -> serde_json::Value {
        serde_json::json!({
            "guild_id": GUILD,
            "user_id": user_id,
            "balance": balance,
            "total_received": balance + 50,
            "total_sent": 50,
            "streak_count": 5,
            "last_daily": "2024-01-14"
        })
    }

    #[tokio::test]
    async fn test_balance_fetch_uses_cache_on_second_call() {
        let (service, api, _cache) = service();
        let path = format!("/guilds/{GUILD}/bytes/balance/{USER}");
        api.stub_json(
            HttpMethod::Get,
            &path,
            200,
            serde_json::json!({
                "guild_id": GUILD,
                "user_id": USER,
                "balance": 100,
                "total_received": 150,
                "total_sent": 50,
                "streak_count": 5,
                "last_daily": "2024-01-14"
            }),
        );

        let first = service.get_balance(GUILD, USER, true).await.unwrap();
        assert_eq!(first.balance, 100);
        assert_eq!(api.call_count(HttpMethod::Get, &path), 1);

        let second = service.get_balance(GUILD, USER, true).await.unwrap();
        assert_eq!(second.balance, 100);
        assert_eq!(second.streak_count, 5);
        // Second call served from cache.
        assert_eq!(api.call_count(HttpMethod::Get, &path), 1);
    }

    #[tokio::test]
    async fn test_balance_not_found_maps_to_domain_error() {
        let (service, api, _cache) = service();
        let path = format!("/guilds/{GUILD}/bytes/balance/{USER}");
        api.stub_json(
            HttpMethod::Get,
            &path,
            404,
            serde_json::json!({"detail": "no balance"}),
        );

        let err = service.get_balance(GUILD, USER, false).await.unwrap_err();
        match err {
            ServiceError::NotFound {
                resource_type,
                resource_id,
            } => {
                assert_eq!(resource_type, "user_balance");
                assert_eq!(resource_id, format!("{GUILD}:{USER}"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_balance_rejects_malformed_ids() {
        let (service, _api, _cache) = service();
        for bad in ["", "12345", "abc123456789012345", "1234567890'; DROP--"] {
            let err = service.get_balance(GUILD, bad, false).await.unwrap_err();
            assert!(matches!(err, ServiceError::Validation { field: "user_id", .. }));
        }
    }

    #[tokio::test]
    async fn test_transfer_success_updates_balances_and_caches() {
        let (service, api, cache) = service();

        let giver_path = format!("/guilds/{GUILD}/bytes/balance/{USER}");
        let receiver_path = format!("/guilds/{GUILD}/bytes/balance/{OTHER}");
        let tx_path = format!("/guilds/{GUILD}/bytes/transactions");

        api.stub_json(HttpMethod::Get, &giver_path, 200, balance_json(USER, 100));
        api.stub_json(HttpMethod::Get, &receiver_path, 200, balance_json(OTHER, 75));
        api.stub_json(
            HttpMethod::Post,
            &tx_path,
            200,
            serde_json::json!({
                "id": "8f5c5e63-58a4-4f3b-9a39-7d30a3a80b11",
                "amount": 50,
                "giver_id": USER,
                "receiver_id": OTHER
            }),
        );

        // Seed caches that the transfer must invalidate.
        cache
            .set(
                &format!("bytesservice:balance:{GUILD}:{USER}"),
                serde_json::json!({"stale": true}),
                None,
            )
            .await
            .unwrap();
        cache
            .set(
                &format!("bytesservice:leaderboard:{GUILD}:10"),
                serde_json::json!([]),
                None,
            )
            .await
            .unwrap();

        let giver = UserRef::new(USER, "giver");
        let receiver = UserRef::new(OTHER, "receiver");
        let result = service
            .transfer_bytes(GUILD, &giver, &receiver, 50, Some("thanks"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.transaction.as_ref().unwrap().amount, 50);
        assert_eq!(result.new_giver_balance, Some(50));
        assert_eq!(result.new_receiver_balance, Some(75));

        assert!(cache
            .get(&format!("bytesservice:balance:{GUILD}:{USER}"))
            .await
            .unwrap()
            .is_none());
        assert!(cache
            .get(&format!("bytesservice:leaderboard:{GUILD}:10"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_transfer_precondition_failures() {
        let (service, _api, _cache) = service();
        let user = UserRef::new(USER, "user");
        let other = UserRef::new(OTHER, "other");

        let result = service
            .transfer_bytes(GUILD, &user, &user, 10, None)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.reason.as_deref(), Some("You can't send bytes to yourself!"));

        let result = service
            .transfer_bytes(GUILD, &user, &other, 0, None)
            .await
            .unwrap();
        assert_eq!(result.reason.as_deref(), Some("Transfer amount must be positive!"));

        let result = service
            .transfer_bytes(GUILD, &user, &other, 10_001, None)
            .await
            .unwrap();
        assert_eq!(
            result.reason.as_deref(),
            Some("Transfer amount too large! Maximum is 10,000 bytes.")
        );
    }

    #[tokio::test]
    async fn test_transfer_insufficient_balance_checked_before_post() {
        let (service, api, _cache) = service();
        let giver_path = format!("/guilds/{GUILD}/bytes/balance/{USER}");
        api.stub_json(HttpMethod::Get, &giver_path, 200, balance_json(USER, 20));

        let giver = UserRef::new(USER, "giver");
        let receiver = UserRef::new(OTHER, "receiver");
        let err = service
            .transfer_bytes(GUILD, &giver, &receiver, 50, None)
            .await
            .unwrap_err();

        match err {
            ServiceError::InsufficientBalance {
                required,
                available,
                operation,
            } => {
                assert_eq!(required, 50);
                assert_eq!(available, 20);
                assert_eq!(operation, "transfer");
            }
            other => panic!("unexpected: {other:?}"),
        }
        // No transaction POST was attempted.
        assert_eq!(
            api.call_count(HttpMethod::Post, &format!("/guilds/{GUILD}/bytes/transactions")),
            0
        );
    }

    #[tokio::test]
    async fn test_transfer_cooldown_parses_timestamp() {
        let (service, api, _cache) = service();
        let giver_path = format!("/guilds/{GUILD}/bytes/balance/{USER}");
        api.stub_json(HttpMethod::Get, &giver_path, 200, balance_json(USER, 100));
        api.stub_json(
            HttpMethod::Post,
            &format!("/guilds/{GUILD}/bytes/transactions"),
            400,
            serde_json::json!({
                "detail": "Transfer cooldown active. Please wait 3 hours.|1705320000"
            }),
        );

        let giver = UserRef::new(USER, "giver");
        let receiver = UserRef::new(OTHER, "receiver");
        let result = service
            .transfer_bytes(GUILD, &giver, &receiver, 50, None)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.is_cooldown_error);
        assert_eq!(result.cooldown_end_timestamp, Some(1705320000));
        assert_eq!(
            result.reason.as_deref(),
            Some("Transfer cooldown active. Please wait 3 hours.")
        );
    }

    #[tokio::test]
    async fn test_transfer_limit_error_keeps_server_wording() {
        let (service, api, _cache) = service();
        let giver_path = format!("/guilds/{GUILD}/bytes/balance/{USER}");
        api.stub_json(HttpMethod::Get, &giver_path, 200, balance_json(USER, 9000));
        api.stub_json(
            HttpMethod::Post,
            &format!("/guilds/{GUILD}/bytes/transactions"),
            400,
            serde_json::json!({"detail": "Transfer amount exceeds maximum limit of 500"}),
        );

        let giver = UserRef::new(USER, "giver");
        let receiver = UserRef::new(OTHER, "receiver");
        let result = service
            .transfer_bytes(GUILD, &giver, &receiver, 600, None)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(!result.is_cooldown_error);
        assert_eq!(
            result.reason.as_deref(),
            Some("Transfer amount exceeds maximum limit of 500")
        );
    }

    #[tokio::test]
    async fn test_claim_daily_happy_path() {
        let (service, api, _cache) = service();
        api.stub_json(
            HttpMethod::Post,
            &format!("/guilds/{GUILD}/bytes/daily"),
            200,
            serde_json::json!({
                "balance": {
                    "guild_id": GUILD,
                    "user_id": USER,
                    "balance": 110,
                    "total_received": 160,
                    "total_sent": 50,
                    "streak_count": 6,
                    "last_daily": "2024-01-15"
                },
                "reward_amount": 10,
                "streak_bonus": 1,
                "next_claim_at": "2024-01-16T00:00:00Z"
            }),
        );

        let result = service.claim_daily(GUILD, USER, "tester").await.unwrap();
        assert_eq!(result.streak, 6);
        assert_eq!(result.multiplier, 1);
        assert_eq!(result.earned, 10);
        assert!(result.next_claim_at.is_some());
        assert_eq!(result.balance.balance, 110);
    }

    #[tokio::test]
    async fn test_claim_daily_conflict_is_already_claimed() {
        let (service, api, _cache) = service();
        api.stub_json(
            HttpMethod::Post,
            &format!("/guilds/{GUILD}/bytes/daily"),
            409,
            serde_json::json!({"detail": "something happened"}),
        );

        let err = service.claim_daily(GUILD, USER, "tester").await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyClaimed { .. }));
    }

    #[tokio::test]
    async fn test_leaderboard_assigns_ranks_and_caches() {
        let (service, api, _cache) = service();
        let path = format!("/guilds/{GUILD}/bytes/leaderboard");
        api.stub_json(
            HttpMethod::Get,
            &path,
            200,
            serde_json::json!({
                "users": [
                    {"user_id": USER, "balance": 500, "total_received": 600, "streak_count": 9},
                    {"user_id": OTHER, "balance": 250}
                ]
            }),
        );

        let entries = service.get_leaderboard(GUILD, 10, true).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[0].user_id, USER);
        assert_eq!(entries[1].rank, 2);
        assert_eq!(entries[1].total_received, 0);

        let again = service.get_leaderboard(GUILD, 10, true).await.unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(api.call_count(HttpMethod::Get, &path), 1);

        let err = service.get_leaderboard(GUILD, 0, true).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation { field: "limit", .. }));
    }

    #[tokio::test]
    async fn test_transaction_history_cache_key_includes_user_and_limit() {
        let (service, api, cache) = service();
        let path = format!("/guilds/{GUILD}/bytes/transactions");
        api.stub_json(
            HttpMethod::Get,
            &path,
            200,
            serde_json::json!({"transactions": []}),
        );

        service
            .get_transaction_history(GUILD, None, 20, true)
            .await
            .unwrap();
        service
            .get_transaction_history(GUILD, Some(USER), 5, true)
            .await
            .unwrap();

        assert!(cache
            .get(&format!("bytesservice:transactions:{GUILD}:all:20"))
            .await
            .unwrap()
            .is_some());
        assert!(cache
            .get(&format!("bytesservice:transactions:{GUILD}:{USER}:5"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_uninitialized_service_fails_fast() {
        let api = Arc::new(MockApiClient::new());
        let service = BytesService::new(api, None);
        let err = service.get_balance(GUILD, USER, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotInitialized("BytesService")));
    }

    #[test]
    fn test_parse_cooldown() {
        assert_eq!(
            parse_cooldown("Transfer cooldown active. Please wait 3 hours.|1705320000"),
            (
                "Transfer cooldown active. Please wait 3 hours.".to_string(),
                Some(1705320000)
            )
        );
        assert_eq!(
            parse_cooldown("Transfer cooldown active.|not-a-number"),
            ("Transfer cooldown active.|not-a-number".to_string(), None)
        );
        assert_eq!(
            parse_cooldown("Transfer cooldown active."),
            ("Transfer cooldown active.".to_string(), None)
        );
    }

    #[test]
    fn test_calculate_multiplier_uses_guild_bonuses() {
        let config: BytesConfig = serde_json::from_value(serde_json::json!({
            "guild_id": GUILD,
            "starting_balance": 100,
            "daily_amount": 10,
            "max_transfer": 1000,
            "streak_bonuses": {"7": 2, "14": 4}
        }))
        .unwrap();

        assert_eq!(BytesService::calculate_multiplier(&config, 6), 1);
        assert_eq!(BytesService::calculate_multiplier(&config, 7), 2);
        assert_eq!(BytesService::calculate_multiplier(&config, 20), 4);
    }

    #[tokio::test]
    async fn test_stats_counts_operations() {
        let (service, api, _cache) = service();
        let path = format!("/guilds/{GUILD}/bytes/balance/{USER}");
        api.stub_json(HttpMethod::Get, &path, 200, balance_json(USER, 100));

        service.get_balance(GUILD, USER, false).await.unwrap();
        service.get_balance(GUILD, USER, false).await.unwrap();

        let stats = service.stats();
        assert_eq!(stats["total_balance_requests"], 2);
        assert_eq!(stats["total_transfers"], 0);
        assert_eq!(stats["cache_enabled"], true);
    }

    #[test]
    fn test_validate_discord_id() {
        assert!(validate_discord_id("user_id", "123456789012345678").is_ok());
        assert!(validate_discord_id("user_id", "").is_err());
        assert!(validate_discord_id("user_id", "123").is_err());
        assert!(validate_discord_id("user_id", "12345678901234567a").is_err());
        assert!(validate_discord_id("user_id", "1234567890<script>").is_err());
    }
}
