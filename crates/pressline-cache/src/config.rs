//! Cache configuration.
//!
//! Loaded once at startup (file → environment) and immutable afterwards.
//!
//! ```toml
//! [cache]
//! negative_ttl_secs = 60
//! jitter_ratio = 0.1
//!
//! [cache.ttl_secs]
//! article = 600
//! user = 900
//!
//! [lock]
//! acquire_timeout_ms = 3000
//! lease_ms = 10000
//!
//! [redis]
//! enabled = true
//! url = "redis://localhost:6379"
//! invalidation_channel = "cache:invalidate"
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub lock: LockSettings,
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.lock.validate()?;

        if self.redis.enabled && self.redis.url.trim().is_empty() {
            return Err(ConfigError::invalid(
                "redis.url",
                "redis.enabled=true requires a url",
            ));
        }
        if self.redis.pool_size == 0 {
            return Err(ConfigError::invalid("redis.pool_size", "must be > 0"));
        }

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("must be one of {valid_levels:?}"),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Cache
// =============================================================================

/// TTL table and local-tier sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Positive TTL per cache name, in seconds.
    #[serde(default = "default_ttl_table")]
    pub ttl_secs: HashMap<String, u64>,

    /// TTL for cache names missing from the table.
    #[serde(default = "default_default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// TTL for negative (confirmed absent) entries.
    /// Must be shorter than every positive TTL.
    #[serde(default = "default_negative_ttl_secs")]
    pub negative_ttl_secs: u64,

    /// Random spread applied to positive TTLs, as a fraction (0.1 = ±10%).
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,

    /// Local (L1) tier max entries.
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: u64,

    /// Local entries unread for this long are dropped.
    #[serde(default = "default_local_idle_secs")]
    pub local_idle_secs: u64,

    /// Upper bound on how long a local copy may outlive a remote eviction.
    #[serde(default = "default_local_max_ttl_secs")]
    pub local_max_ttl_secs: u64,
}

fn default_ttl_table() -> HashMap<String, u64> {
    HashMap::from([
        ("articles".to_string(), 300),
        ("article".to_string(), 600),
        ("user".to_string(), 900),
        ("category".to_string(), 1800),
        ("tag".to_string(), 1800),
        ("hotArticles".to_string(), 300),
    ])
}

fn default_default_ttl_secs() -> u64 {
    600
}

fn default_negative_ttl_secs() -> u64 {
    60
}

fn default_jitter_ratio() -> f64 {
    0.1
}

fn default_local_max_entries() -> u64 {
    10_000
}

fn default_local_idle_secs() -> u64 {
    300
}

fn default_local_max_ttl_secs() -> u64 {
    300
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_table(),
            default_ttl_secs: default_default_ttl_secs(),
            negative_ttl_secs: default_negative_ttl_secs(),
            jitter_ratio: default_jitter_ratio(),
            local_max_entries: default_local_max_entries(),
            local_idle_secs: default_local_idle_secs(),
            local_max_ttl_secs: default_local_max_ttl_secs(),
        }
    }
}

impl CacheSettings {
    pub fn ttl_table(&self) -> HashMap<String, Duration> {
        self.ttl_secs
            .iter()
            .map(|(name, secs)| (name.clone(), Duration::from_secs(*secs)))
            .collect()
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }

    pub fn local_idle(&self) -> Duration {
        Duration::from_secs(self.local_idle_secs)
    }

    pub fn local_max_ttl(&self) -> Duration {
        Duration::from_secs(self.local_max_ttl_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..0.5).contains(&self.jitter_ratio) {
            return Err(ConfigError::invalid(
                "cache.jitter_ratio",
                "must be in [0.0, 0.5)",
            ));
        }
        if self.negative_ttl_secs == 0 {
            return Err(ConfigError::invalid("cache.negative_ttl_secs", "must be > 0"));
        }
        if self.local_max_entries == 0 {
            return Err(ConfigError::invalid("cache.local_max_entries", "must be > 0"));
        }
        if self.local_idle_secs == 0 || self.local_max_ttl_secs == 0 {
            return Err(ConfigError::invalid(
                "cache.local_idle_secs",
                "local expiry settings must be > 0",
            ));
        }

        // The shortest jittered positive TTL must still outlive a negative entry.
        let negative = self.negative_ttl_secs as f64;
        let floor = 1.0 - self.jitter_ratio;
        let positives = self
            .ttl_secs
            .iter()
            .map(|(name, secs)| (name.as_str(), *secs))
            .chain(std::iter::once(("<default>", self.default_ttl_secs)));
        for (name, secs) in positives {
            if (secs as f64) * floor <= negative {
                return Err(ConfigError::invalid(
                    "cache.negative_ttl_secs",
                    format!(
                        "negative TTL {}s is not shorter than TTL {secs}s of `{name}` (after jitter)",
                        self.negative_ttl_secs
                    ),
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Lock
// =============================================================================

/// Distributed lock timing used during miss handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    /// How long a caller waits for the lock before loading directly.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Lease on the lock; must exceed the slowest expected loader.
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    /// Pause between acquire attempts.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Keep extending the lease while the loader runs.
    #[serde(default)]
    pub watchdog: bool,

    /// Cache the result of a direct (unlocked) load after an acquire timeout.
    #[serde(default = "default_write_through_on_timeout")]
    pub write_through_on_timeout: bool,
}

fn default_acquire_timeout_ms() -> u64 {
    3000
}

fn default_lease_ms() -> u64 {
    10_000
}

fn default_retry_interval_ms() -> u64 {
    25
}

fn default_write_through_on_timeout() -> bool {
    true
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: default_acquire_timeout_ms(),
            lease_ms: default_lease_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            watchdog: false,
            write_through_on_timeout: default_write_through_on_timeout(),
        }
    }
}

impl LockSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_ms == 0 {
            return Err(ConfigError::invalid("lock.lease_ms", "must be > 0"));
        }
        if self.retry_interval_ms == 0 {
            return Err(ConfigError::invalid("lock.retry_interval_ms", "must be > 0"));
        }
        if self.lease_ms <= self.retry_interval_ms {
            return Err(ConfigError::invalid(
                "lock.lease_ms",
                "must be greater than lock.retry_interval_ms",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Redis
// =============================================================================

/// Redis connection used for the remote tier, the lock and invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Enable Redis (gracefully degrades to single-instance mode without it)
    #[serde(default)]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Pub/sub channel for cross-instance local-tier invalidation.
    #[serde(default)]
    pub invalidation_channel: Option<String>,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            invalidation_channel: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::{ConfigError, Settings};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    const DEFAULT_CONFIG_FILE: &str = "pressline.toml";

    pub fn load_settings(path: Option<&str>) -> Result<Settings, ConfigError> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                builder = builder.add_source(File::from(PathBuf::from(p)).required(true));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., PRESSLINE__LOCK__LEASE_MS=20000
        builder = builder.add_source(
            Environment::with_prefix("PRESSLINE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?;
        let merged: Settings = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().expect("defaults validate");
        assert_eq!(settings.cache.ttl_secs["article"], 600);
        assert_eq!(settings.cache.ttl_secs["hotArticles"], 300);
        assert_eq!(settings.cache.negative_ttl(), Duration::from_secs(60));
        assert!(!settings.redis.enabled);
        assert!(settings.lock.write_through_on_timeout);
    }

    #[test]
    fn test_negative_ttl_must_be_shorter_than_positive() {
        let mut settings = Settings::default();
        settings.cache.ttl_secs.insert("flash".to_string(), 60);
        let err = settings.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "cache.negative_ttl_secs",
                ..
            }
        ));
    }

    #[test]
    fn test_jitter_counts_against_negative_ttl() {
        let mut settings = Settings::default();
        // 65s * 0.9 = 58.5s, below the 60s negative TTL
        settings.cache.ttl_secs.insert("tight".to_string(), 65);
        assert!(settings.validate().is_err());

        settings.cache.jitter_ratio = 0.0;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_jitter_and_lease() {
        let mut settings = Settings::default();
        settings.cache.jitter_ratio = 0.7;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.lock.lease_ms = 10;
        settings.lock.retry_interval_ms = 10;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            r#"
[cache]
negative_ttl_secs = 30

[cache.ttl_secs]
article = 120

[lock]
acquire_timeout_ms = 500
watchdog = true

[redis]
enabled = true
url = "redis://cache.internal:6379"
invalidation_channel = "cache:invalidate"
"#
        )
        .expect("write config");

        let path = file.path().to_string_lossy().to_string();
        let settings = loader::load_settings(Some(&path)).expect("settings load");

        assert_eq!(settings.cache.ttl_secs.get("article"), Some(&120));
        // A table in the file replaces the default table
        assert!(!settings.cache.ttl_secs.contains_key("user"));
        assert_eq!(settings.cache.negative_ttl_secs, 30);
        assert_eq!(settings.lock.acquire_timeout(), Duration::from_millis(500));
        assert!(settings.lock.watchdog);
        assert_eq!(settings.lock.lease_ms, 10_000);
        assert!(settings.redis.enabled);
        assert_eq!(
            settings.redis.invalidation_channel.as_deref(),
            Some("cache:invalidate")
        );
    }
}
