//! Two-tier cache-aside layer for Pressline.
//!
//! Hot reads (articles, users, categories, tags, trending lists) go through
//! [`TieredCache::get_with_fallback`]: an in-process tier, then a shared remote
//! tier, then the system of record via a caller-supplied loader. Loads of a
//! missing key are serialized cluster-wide through a leased lock, and confirmed
//! absences are cached as short-lived negative entries.

pub mod codec;
pub mod config;
pub mod error;
pub mod facade;
pub mod keys;
pub mod local;
pub mod lock;
pub mod metrics;
pub mod observability;
pub mod pubsub;
pub mod remote;
pub mod ttl;
pub mod warmup;

use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::{Pool, PoolConfig};

pub use config::{CacheSettings, ConfigError, LockSettings, RedisSettings, Settings};
pub use error::{CacheError, CacheResult};
pub use facade::{CacheStats, EntryInspection, SlotState, TieredCache};
pub use local::LocalTier;
pub use lock::{LockBackend, LockCoordinator, LockLease, MemoryLockBackend, RedisLockBackend};
pub use observability::init_tracing;
pub use pubsub::{
    BroadcastInvalidationBus, InvalidationBus, InvalidationListener, InvalidationMessage,
    RedisInvalidationBus,
};
pub use remote::{MemoryRemoteTier, RedisRemoteTier, RemoteTier};
pub use ttl::TtlPolicy;
pub use warmup::{CacheWarmer, WarmError, WarmUpReport};

/// Build a ready cache from settings.
///
/// ## Cache Modes
///
/// - **Redis disabled**: in-process remote tier and lock (single instance)
/// - **Redis enabled**: Redis remote tier and lock, plus the invalidation
///   listener when a channel is configured
///
/// If Redis cannot be reached the cache falls back to single-instance mode so
/// the service can still start.
pub async fn build_cache(settings: &Settings) -> TieredCache {
    let local = LocalTier::from_settings(&settings.cache);
    let policy = TtlPolicy::from_settings(&settings.cache);

    let Some(pool) = connect_redis(&settings.redis).await else {
        return in_process(local, policy, settings);
    };

    let locks = LockCoordinator::new(
        Arc::new(RedisLockBackend::new(pool.clone())),
        settings.lock.clone(),
    );
    let cache = TieredCache::new(
        local,
        Arc::new(RedisRemoteTier::new(pool.clone())),
        locks,
        policy,
    );

    match &settings.redis.invalidation_channel {
        Some(channel) => cache.with_invalidation(Arc::new(RedisInvalidationBus::new(
            pool,
            settings.redis.url.clone(),
            channel.clone(),
        ))),
        None => cache,
    }
}

fn in_process(local: LocalTier, policy: TtlPolicy, settings: &Settings) -> TieredCache {
    let locks = LockCoordinator::new(Arc::new(MemoryLockBackend::new()), settings.lock.clone());
    TieredCache::new(local, Arc::new(MemoryRemoteTier::new()), locks, policy)
}

/// Create a Redis pool and check it with one connection. `None` means
/// Redis is disabled or unreachable.
pub async fn connect_redis(config: &RedisSettings) -> Option<Pool> {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-process remote tier");
        return None;
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let timeout = Duration::from_millis(config.timeout_ms);
    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let pool_config = redis_config
        .pool
        .get_or_insert_with(|| PoolConfig::new(config.pool_size));
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to in-process remote tier."
            );
            return None;
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            Some(pool)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to in-process remote tier."
            );
            None
        }
    }
}
