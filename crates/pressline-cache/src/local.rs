//! In-process (L1) tier.
//!
//! Bounded by entry count, with per-entry TTL capped by `max_ttl` and an idle
//! timeout. Keys are the namespaced remote keys (`<cache>::<key>`).

use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;

use crate::codec::CachedSlot;
use crate::config::CacheSettings;
use crate::keys::KeyPattern;

#[derive(Debug, Clone)]
struct LocalEntry {
    slot: CachedSlot,
    ttl: Duration,
}

/// Expires each entry after the TTL it was inserted with.
struct EntryTtl;

impl Expiry<String, LocalEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &LocalEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &LocalEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Clone)]
pub struct LocalTier {
    entries: Cache<String, LocalEntry>,
    max_ttl: Duration,
}

impl LocalTier {
    pub fn new(max_entries: u64, idle: Duration, max_ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries)
                .time_to_idle(idle)
                .expire_after(EntryTtl)
                .build(),
            max_ttl,
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(
            settings.local_max_entries,
            settings.local_idle(),
            settings.local_max_ttl(),
        )
    }

    pub async fn get(&self, key: &str) -> Option<CachedSlot> {
        self.entries.get(key).await.map(|entry| entry.slot)
    }

    /// Insert with a TTL, capped at the tier's max TTL.
    pub async fn insert(&self, key: String, slot: CachedSlot, ttl: Duration) {
        let ttl = ttl.min(self.max_ttl);
        if ttl.is_zero() {
            return;
        }
        self.entries.insert(key, LocalEntry { slot, ttl }).await;
    }

    pub async fn remove(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    /// Remove every entry whose key matches. Returns the number removed.
    pub async fn remove_matching(&self, pattern: &KeyPattern) -> usize {
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(key, _)| key.as_ref().clone())
            .collect();

        for key in &matching {
            self.entries.invalidate(key).await;
        }
        matching.len()
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Approximate entry count (moka applies writes lazily).
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    pub async fn sync(&self) {
        self.entries.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier() -> LocalTier {
        LocalTier::new(100, Duration::from_secs(60), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let tier = tier();
        let slot = CachedSlot::present(vec![1, 2, 3]);
        tier.insert("article::1".into(), slot.clone(), Duration::from_secs(10))
            .await;

        assert_eq!(tier.get("article::1").await, Some(slot));
        assert_eq!(tier.get("article::2").await, None);
    }

    #[tokio::test]
    async fn test_negative_slot_is_cached() {
        let tier = tier();
        tier.insert("user::ghost".into(), CachedSlot::Absent, Duration::from_secs(10))
            .await;
        assert_eq!(tier.get("user::ghost").await, Some(CachedSlot::Absent));
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let tier = tier();
        tier.insert(
            "article::1".into(),
            CachedSlot::present(vec![1]),
            Duration::from_millis(50),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(tier.get("article::1").await, None);
    }

    #[tokio::test]
    async fn test_ttl_capped_by_max_ttl() {
        let tier = LocalTier::new(100, Duration::from_secs(60), Duration::from_millis(50));
        tier.insert(
            "article::1".into(),
            CachedSlot::present(vec![1]),
            Duration::from_secs(600),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(tier.get("article::1").await, None);
    }

    #[tokio::test]
    async fn test_remove_and_remove_matching() {
        let tier = tier();
        for key in ["articles::page:1", "articles::page:2", "articles::tag:1"] {
            tier.insert(key.into(), CachedSlot::present(vec![0]), Duration::from_secs(10))
                .await;
        }
        tier.sync().await;

        tier.remove("articles::tag:1").await;
        assert_eq!(tier.get("articles::tag:1").await, None);

        let pattern = KeyPattern::new("articles", "page:*").unwrap();
        assert_eq!(tier.remove_matching(&pattern).await, 2);
        assert_eq!(tier.get("articles::page:1").await, None);
        assert_eq!(tier.get("articles::page:2").await, None);
    }
}
