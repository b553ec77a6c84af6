//! Startup pre-population.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::CacheError;
use crate::facade::TieredCache;

#[derive(Debug, Error)]
pub enum WarmError {
    /// The system of record could not be read.
    #[error("source unavailable: {0}")]
    Source(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Pre-populates one family of entries, typically through
/// [`TieredCache::put`] or [`TieredCache::get_with_fallback`].
#[async_trait]
pub trait CacheWarmer: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the number of entries written.
    async fn warm(&self, cache: &TieredCache) -> Result<usize, WarmError>;
}

/// Per-warmer result of [`TieredCache::warm_up`].
#[derive(Debug, Default, Clone)]
pub struct WarmUpReport {
    pub warmed: Vec<(String, usize)>,
    pub failed: Vec<(String, String)>,
}

impl WarmUpReport {
    pub fn total_entries(&self) -> usize {
        self.warmed.iter().map(|(_, n)| n).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
