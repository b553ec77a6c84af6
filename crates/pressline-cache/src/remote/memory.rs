use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::RemoteTier;
use crate::error::CacheResult;
use crate::keys::KeyPattern;
use crate::ttl::deadline_after;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct StoredValue {
    data: Arc<Vec<u8>>,
    expires_at: Instant,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Remote tier kept in process memory.
///
/// Used when Redis is disabled or unreachable at startup. Clones share the
/// same map, so several facades built over one instance behave like several
/// application instances sharing a Redis.
///
/// Expired entries are dropped when read, and by a sweep that runs on write
/// at most once per sweep interval. Keys written once and never read again
/// (negative entries for random ids, typically) are freed that way.
#[derive(Clone)]
pub struct MemoryRemoteTier {
    entries: Arc<DashMap<String, StoredValue>>,
    next_sweep: Arc<Mutex<Instant>>,
    sweep_interval: Duration,
}

impl Default for MemoryRemoteTier {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl MemoryRemoteTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_sweep: Arc::new(Mutex::new(deadline_after(sweep_interval))),
            sweep_interval,
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, value| !value.is_expired());
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            tracing::debug!(purged, "swept expired in-memory remote entries");
        }
        purged
    }

    fn maybe_sweep(&self) {
        // A concurrent writer already sweeping is enough
        let Ok(mut next_sweep) = self.next_sweep.try_lock() else {
            return;
        };
        if Instant::now() < *next_sweep {
            return;
        }
        *next_sweep = deadline_after(self.sweep_interval);
        drop(next_sweep);
        self.purge_expired();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RemoteTier for MemoryRemoteTier {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.data.as_ref().clone()));
            }
            drop(entry);
            self.entries.remove_if(key, |_, v| v.is_expired());
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.maybe_sweep();
        self.entries.insert(
            key.to_string(),
            StoredValue {
                data: Arc::new(value.to_vec()),
                expires_at: deadline_after(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, value)| !value.is_expired()))
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> CacheResult<usize> {
        let mut deleted = 0;
        self.entries.retain(|key, value| {
            if pattern.matches(key) {
                if !value.is_expired() {
                    deleted += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(deleted)
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now())))
    }

    fn mode(&self) -> &'static str {
        "memory"
    }
}
