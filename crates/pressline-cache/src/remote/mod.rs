//! Shared (L2) tier.
//!
//! Values are stored as encoded envelopes (see [`crate::codec`]) under
//! namespaced keys. Two implementations:
//!
//! - [`RedisRemoteTier`]: Redis, shared by every instance
//! - [`MemoryRemoteTier`]: process-local map, for single-instance mode and tests

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;
use crate::keys::KeyPattern;

pub use self::memory::MemoryRemoteTier;
pub use self::redis::RedisRemoteTier;

#[async_trait]
pub trait RemoteTier: Send + Sync {
    /// Raw envelope stored under `key`, if any.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Delete `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Delete every key matching the pattern. Returns the number deleted.
    async fn delete_matching(&self, pattern: &KeyPattern) -> CacheResult<usize>;

    /// Remaining time to live of `key`, `None` if absent or without expiry.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Short name of the backend for logs and operator output.
    fn mode(&self) -> &'static str;
}
