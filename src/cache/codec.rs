//! Serialization boundary between typed values and the shared store
//!
//! Values cross the store as JSON text. Plain TTL entries are wrapped in a
//! tagged [`Cached`] variant so that "the source has no such row" is stored
//! explicitly instead of being smuggled in as a magic value. Logical
//! expiration entries carry their own expiry timestamp in [`CacheEntry`].

use crate::error::CacheResult;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// A TTL-cached payload: either a real value or the absence marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Cached<T> {
    /// The loader produced a value
    Present(T),
    /// The loader reported nothing for this key
    Absent,
}

impl<T> Cached<T> {
    /// Convert into the caller-facing option
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent => None,
        }
    }
}

/// A value wrapped with its logical expiration time
///
/// The store keeps this entry without a TTL; staleness is decided by comparing
/// `logical_expire_at` with the current time. Entries are only ever replaced
/// whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// The cached value
    pub value: T,

    /// When the value becomes logically stale
    pub logical_expire_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    /// Wrap a value with an explicit expiry
    pub fn new(value: T, logical_expire_at: DateTime<Utc>) -> Self {
        Self {
            value,
            logical_expire_at,
        }
    }

    /// Wrap a value that stays fresh for `ttl` from now
    pub fn expiring_in(value: T, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let logical_expire_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(value, logical_expire_at)
    }

    /// Check if the entry is still logically fresh
    pub fn is_fresh(&self) -> bool {
        Utc::now() < self.logical_expire_at
    }
}

/// Encode any serializable payload for the store
pub fn encode<T: Serialize>(payload: &T) -> CacheResult<String> {
    Ok(serde_json::to_string(payload)?)
}

/// Decode a raw store value, treating a shape mismatch as a miss
pub fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Cache data format mismatch for key {}: {}", key, e);
            None
        }
    }
}
