use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;

use super::RemoteTier;
use crate::error::{CacheError, CacheResult};
use crate::keys::KeyPattern;

const SCAN_BATCH: usize = 100;

/// Remote tier backed by a Redis connection pool.
#[derive(Clone)]
pub struct RedisRemoteTier {
    pool: Pool,
}

impl RedisRemoteTier {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn conn(&self) -> CacheResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::remote(format!("failed to get Redis connection: {e}")))
    }
}

#[async_trait]
impl RemoteTier for RedisRemoteTier {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| CacheError::remote(format!("GET {key}: {e}")))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        // PX 0 is rejected by Redis
        let ttl_ms = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::remote(format!("SET {key}: {e}")))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        let removed: usize = conn
            .del(key)
            .await
            .map_err(|e| CacheError::remote(format!("DEL {key}: {e}")))?;
        Ok(removed > 0)
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> CacheResult<usize> {
        let mut conn = self.conn().await?;
        let glob = pattern.as_glob();
        let mut cursor: u64 = 0;
        let mut deleted = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(glob)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::remote(format!("SCAN {glob}: {e}")))?;

            if !keys.is_empty() {
                let removed: usize = conn
                    .del(&keys)
                    .await
                    .map_err(|e| CacheError::remote(format!("DEL batch for {glob}: {e}")))?;
                deleted += removed;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        tracing::debug!(pattern = %glob, deleted, "remote pattern delete");
        Ok(deleted)
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let mut conn = self.conn().await?;
        let ttl_ms: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::remote(format!("PTTL {key}: {e}")))?;
        // -2: no such key, -1: no expiry
        Ok((ttl_ms >= 0).then(|| Duration::from_millis(ttl_ms as u64)))
    }

    fn mode(&self) -> &'static str {
        "redis"
    }
}
