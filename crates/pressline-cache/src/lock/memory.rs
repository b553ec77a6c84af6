use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::LockBackend;
use crate::error::CacheResult;
use crate::ttl::deadline_after;

#[derive(Debug, Clone)]
struct Holder {
    token: String,
    expires_at: Instant,
}

impl Holder {
    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// In-process lock table. Mutual exclusion holds across every facade sharing
/// one instance, which is the whole cluster in single-instance mode.
#[derive(Clone, Default)]
pub struct MemoryLockBackend {
    holders: Arc<DashMap<String, Holder>>,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn try_lock(&self, key: &str, token: &str, lease: Duration) -> CacheResult<bool> {
        let holder = Holder {
            token: token.to_string(),
            expires_at: deadline_after(lease),
        };
        match self.holders.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live() {
                    return Ok(false);
                }
                occupied.insert(holder);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(holder);
                Ok(true)
            }
        }
    }

    async fn unlock(&self, key: &str, token: &str) -> CacheResult<bool> {
        // An expired holder is dropped whoever it belongs to
        let removed = self
            .holders
            .remove_if(key, |_, holder| holder.token == token || !holder.is_live());
        Ok(removed.is_some_and(|(_, holder)| holder.token == token && holder.is_live()))
    }

    async fn extend(&self, key: &str, token: &str, lease: Duration) -> CacheResult<bool> {
        match self.holders.get_mut(key) {
            Some(mut holder) if holder.token == token && holder.is_live() => {
                holder.expires_at = deadline_after(lease);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn holder(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self
            .holders
            .get(key)
            .filter(|holder| holder.is_live())
            .map(|holder| holder.token.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unlock_drops_expired_holder() {
        let locks = MemoryLockBackend::new();
        assert!(locks.try_lock("cache:lock:a:1", "t1", Duration::from_millis(5)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!locks.unlock("cache:lock:a:1", "someone-else").await.unwrap());
        assert_eq!(locks.holders.len(), 0);
    }

    #[tokio::test]
    async fn test_unlock_keeps_live_foreign_holder() {
        let locks = MemoryLockBackend::new();
        assert!(locks.try_lock("cache:lock:a:1", "t1", Duration::from_secs(5)).await.unwrap());
        assert!(!locks.unlock("cache:lock:a:1", "t2").await.unwrap());
        assert_eq!(locks.holder("cache:lock:a:1").await.unwrap().as_deref(), Some("t1"));
        assert!(locks.unlock("cache:lock:a:1", "t1").await.unwrap());
    }

    #[tokio::test]
    async fn test_huge_lease_does_not_overflow() {
        let locks = MemoryLockBackend::new();
        assert!(locks.try_lock("cache:lock:a:1", "t1", Duration::MAX).await.unwrap());
        assert!(locks.extend("cache:lock:a:1", "t1", Duration::MAX).await.unwrap());
    }
}
