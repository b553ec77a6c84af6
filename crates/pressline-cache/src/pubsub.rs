//! Cross-instance invalidation of the local tier.
//!
//! Evictions remove an entry from the remote tier and from this instance's
//! local tier. Other instances still hold local copies until their local TTL
//! runs out, so the evicting instance also publishes an [`InvalidationMessage`]
//! and every instance drops matching local entries on receipt.
//!
//! ```text
//! Instance 1: evict("article", "123")
//!   ↓
//! PUBLISH cache:invalidate {"kind":"key","key":"article::123"}
//!   ↓
//! Instance 2: listener removes "article::123" from L1
//! Instance 3: listener removes "article::123" from L1
//! ```

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use futures_util::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{CacheError, CacheResult};
use crate::keys::KeyPattern;
use crate::local::LocalTier;

const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Payload published on the invalidation channel. Keys and patterns are
/// namespaced (`<cache>::<key>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidationMessage {
    Key { key: String },
    Pattern { pattern: String },
}

impl InvalidationMessage {
    pub fn to_json(&self) -> CacheResult<String> {
        serde_json::to_string(self).map_err(|e| CacheError::serialization(e.to_string()))
    }

    pub fn from_json(payload: &str) -> CacheResult<Self> {
        serde_json::from_str(payload).map_err(|e| CacheError::serialization(e.to_string()))
    }

    /// Drop matching entries from a local tier.
    pub async fn apply(&self, local: &LocalTier) -> CacheResult<usize> {
        match self {
            Self::Key { key } => {
                local.remove(key).await;
                Ok(1)
            }
            Self::Pattern { pattern } => {
                let pattern = KeyPattern::from_glob(pattern.as_str())?;
                Ok(local.remove_matching(&pattern).await)
            }
        }
    }
}

/// Fan-out channel for invalidation messages.
#[async_trait]
pub trait InvalidationBus: Send + Sync {
    async fn publish(&self, message: &InvalidationMessage) -> CacheResult<()>;

    /// Start applying received messages to `local` in a background task.
    fn subscribe(&self, local: LocalTier) -> JoinHandle<()>;
}

/// Redis Pub/Sub invalidation.
#[derive(Clone)]
pub struct RedisInvalidationBus {
    pool: Pool,
    redis_url: String,
    channel: String,
}

impl RedisInvalidationBus {
    pub fn new(pool: Pool, redis_url: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            pool,
            redis_url: redis_url.into(),
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl InvalidationBus for RedisInvalidationBus {
    async fn publish(&self, message: &InvalidationMessage) -> CacheResult<()> {
        let payload = message.to_json()?;
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::remote(format!("failed to get Redis connection: {e}")))?;

        conn.publish::<_, _, ()>(&self.channel, payload)
            .await
            .map_err(|e| CacheError::remote(format!("failed to publish invalidation: {e}")))?;

        tracing::debug!(channel = %self.channel, ?message, "published cache invalidation");
        Ok(())
    }

    fn subscribe(&self, local: LocalTier) -> JoinHandle<()> {
        InvalidationListener::new(self.redis_url.clone(), self.channel.clone(), local).start()
    }
}

/// Subscribes to the invalidation channel and removes entries from L1.
///
/// Reconnects with exponential backoff if the connection is lost.
pub struct InvalidationListener {
    redis_url: String,
    channel: String,
    local: LocalTier,
}

impl InvalidationListener {
    pub fn new(redis_url: impl Into<String>, channel: impl Into<String>, local: LocalTier) -> Self {
        Self {
            redis_url: redis_url.into(),
            channel: channel.into(),
            local,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);

            loop {
                match self.run().await {
                    Ok(()) => backoff = Duration::from_secs(1),
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            channel = %self.channel,
                            backoff_secs = backoff.as_secs(),
                            "cache invalidation listener error, reconnecting"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        })
    }

    async fn run(&self) -> CacheResult<()> {
        let client = redis::Client::open(self.redis_url.as_str())
            .map_err(|e| CacheError::remote(format!("failed to create Redis client: {e}")))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| CacheError::remote(format!("failed to get pub/sub connection: {e}")))?;

        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| CacheError::remote(format!("failed to subscribe: {e}")))?;

        tracing::info!(channel = %self.channel, "subscribed to cache invalidation channel");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let Ok(payload) = msg.get_payload::<String>() else {
                tracing::warn!("failed to read invalidation message payload");
                continue;
            };
            self.handle(&payload).await;
        }
        Err(CacheError::remote("pub/sub connection closed"))
    }

    async fn handle(&self, payload: &str) {
        match InvalidationMessage::from_json(payload) {
            Ok(message) => match message.apply(&self.local).await {
                Ok(removed) => {
                    tracing::debug!(?message, removed, "applied cache invalidation")
                }
                Err(e) => tracing::warn!(?message, error = %e, "invalid invalidation pattern"),
            },
            Err(e) => tracing::warn!(error = %e, "failed to parse invalidation message"),
        }
    }
}

/// Invalidation over an in-process broadcast channel.
///
/// Connects several facades in one process, the way Redis Pub/Sub connects
/// instances.
#[derive(Clone)]
pub struct BroadcastInvalidationBus {
    sender: broadcast::Sender<InvalidationMessage>,
}

impl BroadcastInvalidationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for BroadcastInvalidationBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl InvalidationBus for BroadcastInvalidationBus {
    async fn publish(&self, message: &InvalidationMessage) -> CacheResult<()> {
        // No subscribers is fine
        let _ = self.sender.send(message.clone());
        Ok(())
    }

    fn subscribe(&self, local: LocalTier) -> JoinHandle<()> {
        let mut receiver = self.sender.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if let Err(e) = message.apply(&local).await {
                            tracing::warn!(?message, error = %e, "invalid invalidation pattern");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Missed messages cannot be replayed; start over from empty
                        tracing::warn!(skipped, "invalidation receiver lagged, clearing local tier");
                        local.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
