use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::{AsyncCommands, Script};

use super::LockBackend;
use crate::error::{CacheError, CacheResult};

const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
end
return 0
"#;

/// Lock backend on a single Redis: `SET NX PX` to take, compare-and-delete /
/// compare-and-expire scripts to release and renew.
#[derive(Clone)]
pub struct RedisLockBackend {
    pool: Pool,
    unlock: Arc<Script>,
    extend: Arc<Script>,
}

impl RedisLockBackend {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            unlock: Arc::new(Script::new(UNLOCK_SCRIPT)),
            extend: Arc::new(Script::new(EXTEND_SCRIPT)),
        }
    }

    async fn conn(&self) -> CacheResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::lock(format!("failed to get Redis connection: {e}")))
    }
}

fn lease_ms(lease: Duration) -> u64 {
    lease.as_millis().clamp(1, u64::MAX as u128) as u64
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn try_lock(&self, key: &str, token: &str, lease: Duration) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(lease_ms(lease))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::lock(format!("SET NX {key}: {e}")))?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, key: &str, token: &str) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = self
            .unlock
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::lock(format!("unlock {key}: {e}")))?;
        Ok(removed == 1)
    }

    async fn extend(&self, key: &str, token: &str, lease: Duration) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        let extended: i64 = self
            .extend
            .key(key)
            .arg(token)
            .arg(lease_ms(lease))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::lock(format!("extend {key}: {e}")))?;
        Ok(extended == 1)
    }

    async fn holder(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn().await?;
        let token: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| CacheError::lock(format!("GET {key}: {e}")))?;
        Ok(token)
    }
}
