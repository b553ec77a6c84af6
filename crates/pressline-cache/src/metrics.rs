//! Cache metrics.
//!
//! Recorded through the `metrics` facade; the host process installs whichever
//! recorder/exporter it uses. Without a recorder every call is a no-op.

use std::time::Duration;

use metrics::{counter, histogram};

pub const TIER_LOCAL: &str = "L1";
pub const TIER_REMOTE: &str = "L2";

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_NEGATIVE_HITS_TOTAL: &str = "cache_negative_hits_total";
    pub const CACHE_LOADS_TOTAL: &str = "cache_loads_total";
    pub const CACHE_LOCK_TIMEOUTS_TOTAL: &str = "cache_lock_timeouts_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "cache_evictions_total";
    pub const CACHE_LOAD_DURATION_SECONDS: &str = "cache_load_duration_seconds";
    pub const CACHE_TIER_ERRORS_TOTAL: &str = "cache_tier_errors_total";
}

/// How a loader invocation was reached and how it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Loaded under the lock.
    Locked,
    /// Loaded without the lock after an acquire timeout or lock failure.
    Direct,
    /// Loader returned an error.
    Failed,
}

impl LoadOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Direct => "direct",
            Self::Failed => "failed",
        }
    }
}

/// Record a cache hit.
pub fn record_cache_hit(tier: &str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier.to_string()).increment(1);
}

/// Record a cache miss (both tiers).
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a hit on a negative entry.
pub fn record_negative_hit(tier: &str) {
    counter!(names::CACHE_NEGATIVE_HITS_TOTAL, "tier" => tier.to_string()).increment(1);
}

pub fn record_load(outcome: LoadOutcome, duration: Duration) {
    counter!(names::CACHE_LOADS_TOTAL, "outcome" => outcome.as_str()).increment(1);
    histogram!(names::CACHE_LOAD_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn record_lock_timeout() {
    counter!(names::CACHE_LOCK_TIMEOUTS_TOTAL).increment(1);
}

/// Record an eviction. `kind` is `key` or `pattern`.
pub fn record_eviction(kind: &'static str, count: usize) {
    counter!(names::CACHE_EVICTIONS_TOTAL, "kind" => kind).increment(count as u64);
}

/// Record a failed tier operation that was degraded to a miss.
pub fn record_tier_error(tier: &str, op: &'static str) {
    counter!(
        names::CACHE_TIER_ERRORS_TOTAL,
        "tier" => tier.to_string(),
        "op" => op
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::*;

    #[test]
    fn test_hits_are_labelled_by_tier() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_cache_hit(TIER_LOCAL);
            record_cache_hit(TIER_LOCAL);
            record_cache_hit(TIER_REMOTE);
            record_load(LoadOutcome::Locked, Duration::from_millis(3));
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let hits_for = |tier: &str| {
            snapshot.iter().find_map(|(key, _, _, value)| {
                let key = key.key();
                let is_match = key.name() == names::CACHE_HITS_TOTAL
                    && key.labels().any(|l| l.key() == "tier" && l.value() == tier);
                match (is_match, value) {
                    (true, DebugValue::Counter(n)) => Some(*n),
                    _ => None,
                }
            })
        };
        assert_eq!(hits_for(TIER_LOCAL), Some(2));
        assert_eq!(hits_for(TIER_REMOTE), Some(1));

        let loads = snapshot
            .iter()
            .any(|(key, _, _, _)| key.key().name() == names::CACHE_LOADS_TOTAL);
        assert!(loads);
    }
}
