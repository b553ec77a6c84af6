//! Cache-aside facade over the local tier, the remote tier and the load lock.
//!
//! ## Lookup Order
//!
//! 1. Local tier (no network)
//! 2. Remote tier, promoting hits to the local tier
//! 3. Loader, serialized per key through the [`LockCoordinator`]
//!
//! Cache-layer failures are logged and treated as a miss at that tier. Only a
//! loader error reaches the caller of [`TieredCache::get_with_fallback`].

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::codec::{self, CachedSlot};
use crate::error::CacheResult;
use crate::keys::{self, KeyPattern};
use crate::local::LocalTier;
use crate::lock::{LockCoordinator, LockLease};
use crate::metrics::{self, LoadOutcome, TIER_LOCAL, TIER_REMOTE};
use crate::pubsub::{InvalidationBus, InvalidationMessage};
use crate::remote::RemoteTier;
use crate::ttl::TtlPolicy;
use crate::warmup::{CacheWarmer, WarmUpReport};

enum Lookup<T> {
    Hit(T),
    Negative,
    Miss,
}

/// Aborts the invalidation listener when the last facade clone is dropped.
struct ListenerGuard(JoinHandle<()>);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Clone)]
pub struct TieredCache {
    local: LocalTier,
    remote: Arc<dyn RemoteTier>,
    locks: LockCoordinator,
    policy: Arc<TtlPolicy>,
    invalidation: Option<Arc<dyn InvalidationBus>>,
    listener: Option<Arc<ListenerGuard>>,
    warmers: Vec<Arc<dyn CacheWarmer>>,
    write_through_on_timeout: bool,
}

impl TieredCache {
    pub fn new(
        local: LocalTier,
        remote: Arc<dyn RemoteTier>,
        locks: LockCoordinator,
        policy: TtlPolicy,
    ) -> Self {
        let write_through_on_timeout = locks.settings().write_through_on_timeout;
        Self {
            local,
            remote,
            locks,
            policy: Arc::new(policy),
            invalidation: None,
            listener: None,
            warmers: Vec::new(),
            write_through_on_timeout,
        }
    }

    /// Publish evictions on `bus` and apply peers' evictions to the local tier.
    pub fn with_invalidation(mut self, bus: Arc<dyn InvalidationBus>) -> Self {
        let handle = bus.subscribe(self.local.clone());
        self.listener = Some(Arc::new(ListenerGuard(handle)));
        self.invalidation = Some(bus);
        self
    }

    pub fn with_warmer(mut self, warmer: Arc<dyn CacheWarmer>) -> Self {
        self.warmers.push(warmer);
        self
    }

    pub fn with_write_through_on_timeout(mut self, enabled: bool) -> Self {
        self.write_through_on_timeout = enabled;
        self
    }

    pub fn local(&self) -> &LocalTier {
        &self.local
    }

    pub fn remote(&self) -> &Arc<dyn RemoteTier> {
        &self.remote
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    /// Return the cached value, or load it once per key and cache the result.
    ///
    /// `Ok(None)` is a confirmed absence, either cached or just returned by the
    /// loader (and then cached as a negative entry). `ttl` overrides the
    /// configured TTL of `cache_name` for this write.
    pub async fn get_with_fallback<T, F, Fut, E>(
        &self,
        cache_name: &str,
        key: &str,
        loader: F,
        ttl: Option<Duration>,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let entry_key = keys::remote_key(cache_name, key);

        match self.lookup(cache_name, &entry_key, ttl).await {
            Lookup::Hit(value) => return Ok(Some(value)),
            Lookup::Negative => return Ok(None),
            Lookup::Miss => {}
        }
        metrics::record_cache_miss();
        tracing::debug!(cache = %cache_name, key = %key, "cache miss");

        let lease = match self.locks.try_acquire(cache_name, key).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                metrics::record_lock_timeout();
                tracing::warn!(
                    cache = %cache_name,
                    key = %key,
                    "lock acquire timed out, loading without lock"
                );
                return self.load_direct(cache_name, &entry_key, loader, ttl).await;
            }
            Err(e) => {
                metrics::record_tier_error("lock", "acquire");
                tracing::warn!(
                    cache = %cache_name,
                    key = %key,
                    error = %e,
                    "lock service failed, loading without lock"
                );
                return self.load_direct(cache_name, &entry_key, loader, ttl).await;
            }
        };

        self.load_locked(cache_name, &entry_key, lease, loader, ttl)
            .await
    }

    async fn load_locked<T, F, Fut, E>(
        &self,
        cache_name: &str,
        entry_key: &str,
        lease: LockLease,
        loader: F,
        ttl: Option<Duration>,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        // Another holder may have filled the entry while we waited
        match self.lookup_remote(cache_name, entry_key, ttl).await {
            Lookup::Hit(value) => {
                lease.release().await;
                return Ok(Some(value));
            }
            Lookup::Negative => {
                lease.release().await;
                return Ok(None);
            }
            Lookup::Miss => {}
        }

        let started = Instant::now();
        let result = loader().await;
        match &result {
            Ok(value) => {
                metrics::record_load(LoadOutcome::Locked, started.elapsed());
                self.store(cache_name, entry_key, value.as_ref(), ttl).await;
            }
            Err(_) => {
                metrics::record_load(LoadOutcome::Failed, started.elapsed());
                tracing::debug!(cache = %cache_name, key = %entry_key, "loader failed, nothing cached");
            }
        }
        lease.release().await;
        result
    }

    async fn load_direct<T, F, Fut, E>(
        &self,
        cache_name: &str,
        entry_key: &str,
        loader: F,
        ttl: Option<Duration>,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let started = Instant::now();
        let result = loader().await;
        match &result {
            Ok(value) => {
                metrics::record_load(LoadOutcome::Direct, started.elapsed());
                if self.write_through_on_timeout {
                    self.store(cache_name, entry_key, value.as_ref(), ttl).await;
                }
            }
            Err(_) => metrics::record_load(LoadOutcome::Failed, started.elapsed()),
        }
        result
    }

    /// Write a value to both tiers, replacing any entry (negative included).
    ///
    /// The local tier is always written; a remote failure is returned.
    pub async fn put<T>(
        &self,
        cache_name: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()>
    where
        T: Serialize + ?Sized,
    {
        let entry_key = keys::remote_key(cache_name, key);
        let slot = CachedSlot::present(codec::to_payload(value)?);
        let ttl = self.policy.positive_ttl(cache_name, ttl);
        self.write_slot(&entry_key, slot, ttl).await
    }

    /// Remove an entry from both tiers. Returns whether the remote tier held it.
    pub async fn evict(&self, cache_name: &str, key: &str) -> CacheResult<bool> {
        let entry_key = keys::remote_key(cache_name, key);
        self.local.remove(&entry_key).await;
        let removed = self.remote.delete(&entry_key).await;

        self.publish(InvalidationMessage::Key {
            key: entry_key.clone(),
        })
        .await;

        let removed = removed.inspect_err(|e| {
            metrics::record_tier_error(TIER_REMOTE, "delete");
            tracing::warn!(key = %entry_key, error = %e, "remote evict failed");
        })?;
        metrics::record_eviction("key", 1);
        tracing::debug!(cache = %cache_name, key = %key, removed, "cache evict");
        Ok(removed)
    }

    /// Remove every entry of `cache_name` whose key matches the glob
    /// `key_pattern`. Returns the number of remote entries removed.
    pub async fn evict_by_pattern(&self, cache_name: &str, key_pattern: &str) -> CacheResult<usize> {
        let pattern = KeyPattern::new(cache_name, key_pattern)?;
        let local_removed = self.local.remove_matching(&pattern).await;
        let removed = self.remote.delete_matching(&pattern).await;

        self.publish(InvalidationMessage::Pattern {
            pattern: pattern.as_glob().to_string(),
        })
        .await;

        let removed = removed.inspect_err(|e| {
            metrics::record_tier_error(TIER_REMOTE, "delete_matching");
            tracing::warn!(pattern = %pattern.as_glob(), error = %e, "remote pattern evict failed");
        })?;
        metrics::record_eviction("pattern", removed);
        tracing::info!(
            cache = %cache_name,
            pattern = %key_pattern,
            local_removed,
            removed,
            "cache pattern evict"
        );
        Ok(removed)
    }

    /// Run every registered warmer. Failures are logged and reported.
    pub async fn warm_up(&self) -> WarmUpReport {
        let mut report = WarmUpReport::default();
        for warmer in &self.warmers {
            let started = Instant::now();
            match warmer.warm(self).await {
                Ok(entries) => {
                    tracing::info!(
                        warmer = %warmer.name(),
                        entries,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "cache warm-up complete"
                    );
                    report.warmed.push((warmer.name().to_string(), entries));
                }
                Err(e) => {
                    tracing::warn!(warmer = %warmer.name(), error = %e, "cache warm-up failed");
                    report.failed.push((warmer.name().to_string(), e.to_string()));
                }
            }
        }
        report
    }

    /// Describe what each tier holds for one entry.
    pub async fn inspect(&self, cache_name: &str, key: &str) -> CacheResult<EntryInspection> {
        let entry_key = keys::remote_key(cache_name, key);
        let local = SlotState::from_slot(self.local.get(&entry_key).await.as_ref());
        let remote = match self.remote.get(&entry_key).await? {
            Some(bytes) => match CachedSlot::decode(&bytes) {
                Ok(slot) => SlotState::from_slot(Some(&slot)),
                Err(e) => SlotState::Corrupt(e.to_string()),
            },
            None => SlotState::Absent,
        };
        let remote_ttl = self.remote.ttl(&entry_key).await?;
        Ok(EntryInspection {
            key: entry_key,
            local,
            remote,
            remote_ttl,
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            local_entries: self.local.entry_count(),
            remote_mode: self.remote.mode(),
            invalidation: self.invalidation.is_some(),
            warmers: self.warmers.len(),
        }
    }

    async fn lookup<T>(&self, cache_name: &str, entry_key: &str, ttl: Option<Duration>) -> Lookup<T>
    where
        T: DeserializeOwned,
    {
        match self.local.get(entry_key).await {
            Some(CachedSlot::Absent) => {
                metrics::record_negative_hit(TIER_LOCAL);
                tracing::debug!(key = %entry_key, "negative hit (L1)");
                return Lookup::Negative;
            }
            Some(CachedSlot::Present(payload)) => match codec::from_payload(&payload) {
                Ok(value) => {
                    metrics::record_cache_hit(TIER_LOCAL);
                    tracing::debug!(key = %entry_key, "cache hit (L1)");
                    return Lookup::Hit(value);
                }
                Err(e) => {
                    tracing::warn!(key = %entry_key, error = %e, "undecodable local entry, dropping");
                    self.local.remove(entry_key).await;
                }
            },
            None => {}
        }
        self.lookup_remote(cache_name, entry_key, ttl).await
    }

    async fn lookup_remote<T>(
        &self,
        cache_name: &str,
        entry_key: &str,
        ttl: Option<Duration>,
    ) -> Lookup<T>
    where
        T: DeserializeOwned,
    {
        let bytes = match self.remote.get(entry_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Lookup::Miss,
            Err(e) => {
                metrics::record_tier_error(TIER_REMOTE, "get");
                tracing::warn!(key = %entry_key, error = %e, "remote get failed, treating as miss");
                return Lookup::Miss;
            }
        };

        let decoded = CachedSlot::decode(&bytes).and_then(|slot| {
            let value = match &slot {
                CachedSlot::Present(payload) => Some(codec::from_payload::<T>(payload)?),
                CachedSlot::Absent => None,
            };
            Ok((slot, value))
        });

        match decoded {
            Ok((slot, Some(value))) => {
                metrics::record_cache_hit(TIER_REMOTE);
                tracing::debug!(key = %entry_key, "cache hit (L2)");
                let local_ttl = self.policy.positive_ttl(cache_name, ttl);
                self.local.insert(entry_key.to_string(), slot, local_ttl).await;
                Lookup::Hit(value)
            }
            Ok((slot, None)) => {
                metrics::record_negative_hit(TIER_REMOTE);
                tracing::debug!(key = %entry_key, "negative hit (L2)");
                let local_ttl = self.policy.negative_ttl(cache_name, ttl);
                self.local.insert(entry_key.to_string(), slot, local_ttl).await;
                Lookup::Negative
            }
            Err(e) => {
                metrics::record_tier_error(TIER_REMOTE, "decode");
                tracing::warn!(key = %entry_key, error = %e, "undecodable remote entry, evicting");
                if let Err(e) = self.remote.delete(entry_key).await {
                    tracing::warn!(key = %entry_key, error = %e, "failed to evict undecodable entry");
                }
                Lookup::Miss
            }
        }
    }

    /// Cache a loader result: the value, or a negative entry for `None`.
    async fn store<T>(&self, cache_name: &str, entry_key: &str, value: Option<&T>, ttl: Option<Duration>)
    where
        T: Serialize,
    {
        let (slot, entry_ttl) = match value {
            Some(value) => match codec::to_payload(value) {
                Ok(payload) => (
                    CachedSlot::present(payload),
                    self.policy.positive_ttl(cache_name, ttl),
                ),
                Err(e) => {
                    tracing::warn!(key = %entry_key, error = %e, "failed to serialize loaded value, not caching");
                    return;
                }
            },
            None => (CachedSlot::Absent, self.policy.negative_ttl(cache_name, ttl)),
        };

        // Failure already logged; the caller still gets the loaded value
        let _ = self.write_slot(entry_key, slot, entry_ttl).await;
    }

    async fn write_slot(&self, entry_key: &str, slot: CachedSlot, ttl: Duration) -> CacheResult<()> {
        let encoded = slot.encode();
        let negative = slot.is_negative();
        self.local.insert(entry_key.to_string(), slot, ttl).await;

        self.remote
            .set(entry_key, &encoded, ttl)
            .await
            .inspect(|_| {
                tracing::debug!(key = %entry_key, ttl_ms = ttl.as_millis() as u64, negative, "cache set (L1+L2)")
            })
            .inspect_err(|e| {
                metrics::record_tier_error(TIER_REMOTE, "set");
                tracing::warn!(key = %entry_key, error = %e, "remote set failed");
            })
    }

    async fn publish(&self, message: InvalidationMessage) {
        let Some(bus) = &self.invalidation else {
            return;
        };
        if let Err(e) = bus.publish(&message).await {
            tracing::warn!(?message, error = %e, "failed to publish cache invalidation");
        }
    }
}

/// What a tier holds for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// A value of this many payload bytes.
    Value { bytes: usize },
    Negative,
    Absent,
    /// Bytes that are not a valid envelope.
    Corrupt(String),
}

impl SlotState {
    fn from_slot(slot: Option<&CachedSlot>) -> Self {
        match slot {
            Some(CachedSlot::Present(payload)) => Self::Value {
                bytes: payload.len(),
            },
            Some(CachedSlot::Absent) => Self::Negative,
            None => Self::Absent,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntryInspection {
    /// Namespaced key.
    pub key: String,
    pub local: SlotState,
    pub remote: SlotState,
    pub remote_ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub local_entries: u64,
    pub remote_mode: &'static str,
    pub invalidation: bool,
    pub warmers: usize,
}
