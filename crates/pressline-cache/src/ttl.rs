//! Per-cache TTL resolution with jitter.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::CacheSettings;

const MIN_GAP: Duration = Duration::from_millis(1);

/// Resolves how long entries of a cache live in the remote tier.
///
/// Positive TTLs are spread by a random factor so that entries written together
/// do not all expire in the same instant.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    table: HashMap<String, Duration>,
    default_ttl: Duration,
    negative_ttl: Duration,
    jitter_ratio: f64,
}

impl TtlPolicy {
    /// Longest TTL any entry gets, whatever the table or a caller asks for.
    pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

    pub fn new(
        table: HashMap<String, Duration>,
        default_ttl: Duration,
        negative_ttl: Duration,
        jitter_ratio: f64,
    ) -> Self {
        Self {
            table,
            default_ttl,
            negative_ttl,
            jitter_ratio: jitter_ratio.clamp(0.0, 0.5),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(
            settings.ttl_table(),
            settings.default_ttl(),
            settings.negative_ttl(),
            settings.jitter_ratio,
        )
    }

    /// Un-jittered TTL for a cache, honoring a per-call override. Capped at
    /// [`Self::MAX_TTL`].
    pub fn base_ttl(&self, cache_name: &str, override_ttl: Option<Duration>) -> Duration {
        override_ttl
            .or_else(|| self.configured(cache_name))
            .unwrap_or(self.default_ttl)
            .min(Self::MAX_TTL)
    }

    // Config sources may lowercase table keys
    fn configured(&self, cache_name: &str) -> Option<Duration> {
        self.table
            .get(cache_name)
            .or_else(|| self.table.get(&cache_name.to_ascii_lowercase()))
            .copied()
    }

    /// Jittered TTL for a present value. Never at or below the negative TTL
    /// applied to the same cache.
    pub fn positive_ttl(&self, cache_name: &str, override_ttl: Option<Duration>) -> Duration {
        let base = self.base_ttl(cache_name, override_ttl);
        let jittered = if self.jitter_ratio > 0.0 {
            let factor = rand::thread_rng()
                .gen_range((1.0 - self.jitter_ratio)..=(1.0 + self.jitter_ratio));
            base.mul_f64(factor)
        } else {
            base
        };
        let floor = self.negative_ttl(cache_name, override_ttl) + MIN_GAP;
        jittered.max(floor)
    }

    /// TTL for a negative sentinel.
    ///
    /// Normally the configured negative TTL; shortened to half the base TTL when
    /// a per-call override is not longer than it.
    pub fn negative_ttl(&self, cache_name: &str, override_ttl: Option<Duration>) -> Duration {
        let base = self.base_ttl(cache_name, override_ttl);
        if base <= self.negative_ttl {
            (base / 2).max(MIN_GAP)
        } else {
            self.negative_ttl
        }
    }

    pub fn configured_negative_ttl(&self) -> Duration {
        self.negative_ttl
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }
}

/// Instant `ttl` from now, saturating at [`TtlPolicy::MAX_TTL`] for TTLs too
/// large to represent.
pub(crate) fn deadline_after(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .unwrap_or_else(|| now + TtlPolicy::MAX_TTL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> TtlPolicy {
        TtlPolicy::new(
            HashMap::from([
                ("article".to_string(), Duration::from_secs(600)),
                ("user".to_string(), Duration::from_secs(900)),
            ]),
            Duration::from_secs(300),
            Duration::from_secs(60),
            jitter,
        )
    }

    #[test]
    fn test_base_ttl_lookup() {
        let policy = policy(0.1);
        assert_eq!(policy.base_ttl("article", None), Duration::from_secs(600));
        assert_eq!(policy.base_ttl("unknown", None), Duration::from_secs(300));
        assert_eq!(
            policy.base_ttl("article", Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_lowercased_table_key_still_matches() {
        let policy = TtlPolicy::new(
            HashMap::from([("hotarticles".to_string(), Duration::from_secs(300))]),
            Duration::from_secs(600),
            Duration::from_secs(60),
            0.0,
        );
        assert_eq!(policy.base_ttl("hotArticles", None), Duration::from_secs(300));
    }

    #[test]
    fn test_positive_ttl_within_jitter_bounds() {
        let policy = policy(0.1);
        for _ in 0..200 {
            let ttl = policy.positive_ttl("article", None);
            assert!(ttl >= Duration::from_secs(540), "{ttl:?} below bound");
            assert!(ttl <= Duration::from_secs(660), "{ttl:?} above bound");
        }
    }

    #[test]
    fn test_positive_ttl_is_spread() {
        let policy = policy(0.1);
        let first = policy.positive_ttl("user", None);
        let spread = (0..50).any(|_| policy.positive_ttl("user", None) != first);
        assert!(spread, "jitter should vary TTLs");
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = policy(0.0);
        assert_eq!(policy.positive_ttl("user", None), Duration::from_secs(900));
    }

    #[test]
    fn test_negative_ttl_shorter_than_short_override() {
        let policy = policy(0.1);
        assert_eq!(policy.negative_ttl("article", None), Duration::from_secs(60));

        let override_ttl = Some(Duration::from_secs(10));
        let negative = policy.negative_ttl("article", override_ttl);
        assert_eq!(negative, Duration::from_secs(5));
        for _ in 0..50 {
            assert!(policy.positive_ttl("article", override_ttl) > negative);
        }
    }

    #[test]
    fn test_oversized_override_is_capped() {
        let policy = policy(0.1);
        let huge = Some(Duration::MAX);
        assert_eq!(policy.base_ttl("article", huge), TtlPolicy::MAX_TTL);
        assert!(policy.positive_ttl("article", huge) <= TtlPolicy::MAX_TTL.mul_f64(1.1));
        assert_eq!(policy.negative_ttl("article", huge), Duration::from_secs(60));
    }

    #[test]
    fn test_deadline_saturates() {
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline > Instant::now() + Duration::from_secs(3600));
    }

    #[test]
    fn test_jitter_never_drops_to_negative_ttl() {
        // 62s base with ±10% could land at 55.8s; the floor keeps it above 60s
        let policy = TtlPolicy::new(
            HashMap::new(),
            Duration::from_secs(62),
            Duration::from_secs(60),
            0.1,
        );
        for _ in 0..200 {
            assert!(policy.positive_ttl("any", None) > Duration::from_secs(60));
        }
    }
}
