//! Error types for the cache layer.
//!
//! None of these reach callers of `get_with_fallback`: the facade logs them and
//! degrades to the next tier or to the loader. They surface only from the
//! lower-level tier APIs and from operator tooling.

use thiserror::Error;

/// Failure of a cache-layer operation.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The remote tier could not be reached or rejected the command.
    #[error("remote tier unavailable: {0}")]
    RemoteUnavailable(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The lock service failed (distinct from a plain acquire timeout).
    #[error("lock service error: {0}")]
    Lock(String),

    /// An eviction pattern could not be compiled.
    #[error("invalid key pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl CacheError {
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable(message.into())
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock(message.into())
    }

    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
