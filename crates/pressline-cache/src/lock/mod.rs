//! Cluster-wide load lock.
//!
//! One lock per `(cache, key)`, held only while a missing entry is being
//! loaded. Every lock carries a lease so a crashed holder cannot starve other
//! callers. Ownership is tracked with a random token: only the holder that set
//! the lock may extend or release it.

mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::LockSettings;
use crate::error::CacheResult;
use crate::keys;

pub use self::memory::MemoryLockBackend;
pub use self::redis::RedisLockBackend;

/// Storage primitive behind the coordinator.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Set `key` to `token` if unset. Returns whether the lock was taken.
    async fn try_lock(&self, key: &str, token: &str, lease: Duration) -> CacheResult<bool>;

    /// Remove `key` if it still holds `token`. Returns whether it was removed.
    async fn unlock(&self, key: &str, token: &str) -> CacheResult<bool>;

    /// Push the lease out if `key` still holds `token`.
    async fn extend(&self, key: &str, token: &str, lease: Duration) -> CacheResult<bool>;

    /// Current holder token of `key`, if locked.
    async fn holder(&self, key: &str) -> CacheResult<Option<String>>;
}

/// Acquires load locks with a bounded wait.
#[derive(Clone)]
pub struct LockCoordinator {
    backend: Arc<dyn LockBackend>,
    settings: LockSettings,
}

impl LockCoordinator {
    pub fn new(backend: Arc<dyn LockBackend>, settings: LockSettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    pub fn backend(&self) -> &Arc<dyn LockBackend> {
        &self.backend
    }

    /// Try to take the lock for an entry, retrying until the acquire timeout.
    ///
    /// `Ok(None)` means the wait timed out. Errors are lock-service failures.
    pub async fn try_acquire(&self, cache_name: &str, key: &str) -> CacheResult<Option<LockLease>> {
        let lock_key = keys::lock_key(cache_name, key);
        let token = Uuid::new_v4().to_string();
        let lease = self.settings.lease();
        let deadline = Instant::now() + self.settings.acquire_timeout();

        loop {
            if self.backend.try_lock(&lock_key, &token, lease).await? {
                tracing::trace!(lock = %lock_key, "lock acquired");
                return Ok(Some(self.lease_for(lock_key, token)));
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(lock = %lock_key, "lock acquire timed out");
                return Ok(None);
            }
            let pause = self.settings.retry_interval().min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }

    fn lease_for(&self, lock_key: String, token: String) -> LockLease {
        let watchdog = self.settings.watchdog.then(|| {
            spawn_watchdog(
                Arc::clone(&self.backend),
                lock_key.clone(),
                token.clone(),
                self.settings.lease(),
            )
        });
        LockLease {
            backend: Arc::clone(&self.backend),
            key: lock_key,
            token,
            watchdog,
            released: false,
        }
    }
}

/// Renews the lease at a third of its length until aborted or the lock is lost.
fn spawn_watchdog(
    backend: Arc<dyn LockBackend>,
    key: String,
    token: String,
    lease: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = (lease / 3).max(Duration::from_millis(1));
        loop {
            tokio::time::sleep(period).await;
            match backend.extend(&key, &token, lease).await {
                Ok(true) => tracing::trace!(lock = %key, "lock lease renewed"),
                Ok(false) => {
                    tracing::warn!(lock = %key, "lock lost before load finished");
                    break;
                }
                Err(e) => tracing::warn!(lock = %key, error = %e, "lock renewal failed"),
            }
        }
    })
}

/// A held lock. Released explicitly with [`LockLease::release`]; a lease
/// dropped without release is freed in the background.
pub struct LockLease {
    backend: Arc<dyn LockBackend>,
    key: String,
    token: String,
    watchdog: Option<JoinHandle<()>>,
    released: bool,
}

impl LockLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub async fn release(mut self) {
        self.released = true;
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        match self.backend.unlock(&self.key, &self.token).await {
            Ok(true) => tracing::trace!(lock = %self.key, "lock released"),
            Ok(false) => tracing::debug!(lock = %self.key, "lock already expired at release"),
            Err(e) => {
                tracing::warn!(lock = %self.key, error = %e, "lock release failed, lease will expire")
            }
        }
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        if self.released {
            return;
        }
        // Loader panicked or the future was cancelled mid-load.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let backend = Arc::clone(&self.backend);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = backend.unlock(&key, &token).await {
                tracing::warn!(lock = %key, error = %e, "background lock release failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(acquire_ms: u64, lease_ms: u64, watchdog: bool) -> LockSettings {
        LockSettings {
            acquire_timeout_ms: acquire_ms,
            lease_ms,
            retry_interval_ms: 5,
            watchdog,
            write_through_on_timeout: true,
        }
    }

    fn coordinator(settings: LockSettings) -> (LockCoordinator, MemoryLockBackend) {
        let backend = MemoryLockBackend::new();
        (
            LockCoordinator::new(Arc::new(backend.clone()), settings),
            backend,
        )
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let (locks, backend) = coordinator(settings(100, 1000, false));
        let lease = locks.try_acquire("article", "1").await.unwrap().unwrap();
        assert_eq!(lease.key(), "cache:lock:article:1");
        assert_eq!(
            backend.holder("cache:lock:article:1").await.unwrap().as_deref(),
            Some(lease.token())
        );

        lease.release().await;
        assert_eq!(backend.holder("cache:lock:article:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_contended_acquire_times_out() {
        let (locks, backend) = coordinator(settings(50, 5000, false));
        backend
            .try_lock("cache:lock:article:1", "other", Duration::from_secs(5))
            .await
            .unwrap();

        let started = Instant::now();
        assert!(locks.try_acquire("article", "1").await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let (locks, _) = coordinator(settings(1000, 5000, false));
        let first = locks.try_acquire("article", "1").await.unwrap().unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.try_acquire("article", "1").await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        first.release().await;

        let second = waiter.await.unwrap().unwrap();
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn test_lease_expiry_frees_lock() {
        let (locks, _) = coordinator(settings(10, 40, false));
        let crashed = locks.try_acquire("article", "1").await.unwrap().unwrap();
        // Simulate a crashed holder: never released, no drop cleanup
        std::mem::forget(crashed);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(locks.try_acquire("article", "1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_watchdog_keeps_lock_alive() {
        let (locks, backend) = coordinator(settings(10, 60, true));
        let lease = locks.try_acquire("article", "1").await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            backend.holder("cache:lock:article:1").await.unwrap().as_deref(),
            Some(lease.token())
        );
        lease.release().await;
        assert_eq!(backend.holder("cache:lock:article:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dropped_lease_is_released() {
        let (locks, backend) = coordinator(settings(100, 5000, false));
        let lease = locks.try_acquire("article", "1").await.unwrap().unwrap();
        drop(lease);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.holder("cache:lock:article:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_foreign_token_cannot_release() {
        let backend = MemoryLockBackend::new();
        backend
            .try_lock("k", "owner", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!backend.unlock("k", "intruder").await.unwrap());
        assert!(!backend.extend("k", "intruder", Duration::from_secs(5)).await.unwrap());
        assert!(backend.unlock("k", "owner").await.unwrap());
    }
}
