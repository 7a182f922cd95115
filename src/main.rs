//! guildforge - bot service entry point.
//!
//! Wires configuration, cache, services, and schedulers, then runs until
//! ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use guildforge::api::{ApiClient, HttpApiClient};
use guildforge::cache::{Cache, MemoryCache, RedisCache};
use guildforge::config::Config;
use guildforge::discord::{DiscordRest, HttpDiscordRest};
use guildforge::schedulers::advent_of_code::AdventOfCodeScheduler;
use guildforge::schedulers::challenges::ChallengeScheduler;
use guildforge::schedulers::quests::QuestScheduler;
use guildforge::schedulers::repeating_messages::RepeatingMessageScheduler;
use guildforge::schedulers::scheduled_messages::ScheduledMessageScheduler;
use guildforge::services::bytes::BytesService;
use guildforge::services::squads::SquadsService;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guildforge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration: api={}", config.api_base_url);

    let api: Arc<dyn ApiClient> = Arc::new(HttpApiClient::with_retry(
        &config.api_base_url,
        &config.api_token,
        config.retry.clone(),
        config.pool_max_connections,
    ));

    let cache: Arc<dyn Cache> = match &config.cache.url {
        Some(url) => {
            match RedisCache::connect(url, &config.cache.key_prefix, config.cache.default_ttl)
                .await
            {
                Ok(redis) => Arc::new(redis),
                Err(e) => {
                    warn!("Redis unavailable ({e}), falling back to in-process cache");
                    Arc::new(MemoryCache::new(config.cache.default_ttl))
                }
            }
        }
        None => {
            info!("No CACHE_URL set, using in-process cache");
            Arc::new(MemoryCache::new(config.cache.default_ttl))
        }
    };

    let rest: Arc<dyn DiscordRest> = Arc::new(HttpDiscordRest::new(&config.discord_token));

    let bytes = Arc::new(BytesService::new(api.clone(), Some(cache.clone())));
    bytes.initialize()?;
    let squads = Arc::new(SquadsService::new(api.clone(), Some(cache.clone())));
    squads.initialize()?;

    let challenges = Arc::new(ChallengeScheduler::new(
        api.clone(),
        Some(cache.clone()),
        rest.clone(),
    ));
    challenges.initialize().await?;

    let quests = Arc::new(QuestScheduler::new(
        api.clone(),
        Some(cache.clone()),
        rest.clone(),
    ));
    quests.initialize().await?;

    let scheduled = Arc::new(ScheduledMessageScheduler::new(
        api.clone(),
        Some(cache.clone()),
        rest.clone(),
    ));
    scheduled.initialize().await?;

    let repeating = Arc::new(RepeatingMessageScheduler::new(
        api.clone(),
        Some(cache.clone()),
        rest.clone(),
    ));
    repeating.initialize().await?;

    let advent = Arc::new(AdventOfCodeScheduler::new(
        api.clone(),
        Some(cache.clone()),
        rest.clone(),
    ));
    advent.initialize().await?;

    info!("All services and schedulers running");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    advent.cleanup().await;
    repeating.cleanup().await;
    scheduled.cleanup().await;
    quests.cleanup().await;
    challenges.cleanup().await;
    squads.cleanup().await;
    bytes.cleanup().await;
    cache.close().await;

    // Give in-flight job tasks a moment to observe cancellation.
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!("Shutdown complete");

    Ok(())
}
