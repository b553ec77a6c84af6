//! Stored value envelope.
//!
//! Every remote value is wrapped so that a negative entry can never be confused
//! with a legitimately cached value (including a serialized `None`) or with a
//! missing key:
//!
//! ```text
//! ┌──────┬─────────┬─────┬──────────────────────────┐
//! │ 0xC7 │ version │ tag │ payload (MessagePack)    │
//! └──────┴─────────┴─────┴──────────────────────────┘
//!   tag = b'V' → value, payload follows
//!   tag = b'N' → negative sentinel, no payload
//! ```

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{CacheError, CacheResult};

const MAGIC: u8 = 0xC7;
const VERSION: u8 = 1;
const TAG_VALUE: u8 = b'V';
const TAG_NEGATIVE: u8 = b'N';
const HEADER_LEN: usize = 3;

/// Content of a cache entry in either tier.
///
/// The payload is wrapped in `Arc` so local-tier hits are cheap clones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedSlot {
    /// A serialized value.
    Present(Arc<Vec<u8>>),
    /// Confirmed absent upstream.
    Absent,
}

impl CachedSlot {
    pub fn present(payload: Vec<u8>) -> Self {
        Self::Present(Arc::new(payload))
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Encode for the remote tier.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Present(payload) => {
                let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
                out.extend_from_slice(&[MAGIC, VERSION, TAG_VALUE]);
                out.extend_from_slice(payload);
                out
            }
            Self::Absent => vec![MAGIC, VERSION, TAG_NEGATIVE],
        }
    }

    /// Decode bytes read from the remote tier.
    pub fn decode(bytes: &[u8]) -> CacheResult<Self> {
        let [magic, version, tag, payload @ ..] = bytes else {
            return Err(CacheError::serialization(format!(
                "envelope too short ({} bytes)",
                bytes.len()
            )));
        };
        if *magic != MAGIC {
            return Err(CacheError::serialization(format!(
                "unexpected envelope marker {magic:#04x}"
            )));
        }
        if *version != VERSION {
            return Err(CacheError::serialization(format!(
                "unsupported envelope version {version}"
            )));
        }
        match *tag {
            TAG_VALUE => Ok(Self::present(payload.to_vec())),
            TAG_NEGATIVE if payload.is_empty() => Ok(Self::Absent),
            TAG_NEGATIVE => Err(CacheError::serialization(
                "negative entry carries a payload",
            )),
            other => Err(CacheError::serialization(format!(
                "unknown envelope tag {other:#04x}"
            ))),
        }
    }
}

/// Serialize a value into a slot payload.
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> CacheResult<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| CacheError::serialization(e.to_string()))
}

/// Deserialize a slot payload.
pub fn from_payload<T: DeserializeOwned>(payload: &[u8]) -> CacheResult<T> {
    rmp_serde::from_slice(payload).map_err(|e| CacheError::serialization(e.to_string()))
}
