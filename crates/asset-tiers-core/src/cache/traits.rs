//! Cache configuration, entry and statistics types.

use crate::config::{duration_ms, TierDefaults};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for cache behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct CacheConfig {
    /// Maximum total payload bytes.
    pub max_bytes: u64,
    /// Maximum number of entries.
    pub max_entries: usize,
    /// Default TTL for cache entries.
    #[serde(with = "duration_ms", rename = "default_ttl_ms")]
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: TierDefaults::CACHE_MAX_BYTES,
            max_entries: TierDefaults::CACHE_MAX_ENTRIES,
            default_ttl: TierDefaults::CACHE_DEFAULT_TTL,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_bytes == 0 {
            errors.push("cache max_bytes must be positive".to_string());
        }
        if self.max_entries == 0 {
            errors.push("cache max_entries must be positive".to_string());
        }
        if self.default_ttl.is_zero() {
            errors.push("cache default TTL must be positive".to_string());
        }
        errors
    }
}

/// A cached asset with bookkeeping.
///
/// `size` always equals `payload.len()`; entries are built through
/// [`CacheEntry::new`] and the cache rejects any mismatch.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Bytes,
    pub content_type: String,
    pub size: u64,
    /// Content modification time reported by the source tier.
    pub last_modified: DateTime<Utc>,
    pub etag: Option<String>,
    /// When the entry was stored.
    pub stored_at: Instant,
    /// When the entry was last read; drives LRU ordering.
    pub last_accessed: Instant,
    pub expires_at: Instant,
    pub hit_count: u64,
    /// Insertion sequence, tie-breaker for LRU ordering.
    pub(crate) seq: u64,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        payload: impl Into<Bytes>,
        content_type: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        let payload = payload.into();
        let now = Instant::now();
        Self {
            key: key.into(),
            size: payload.len() as u64,
            payload,
            content_type: content_type.into(),
            last_modified,
            etag: None,
            stored_at: now,
            last_accessed: now,
            expires_at: now,
            hit_count: 0,
            seq: 0,
        }
    }

    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }

    /// TTL the entry was stored with.
    pub fn ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(self.stored_at)
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_bytes: u64,
    pub max_entries: usize,
    pub max_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Resident entries past their expiry (not yet swept).
    pub expired_entries: usize,
    pub refreshes_in_flight: usize,
    /// `hits / (hits + misses)`; 0 before any lookup.
    pub hit_rate: f64,
    /// `total_bytes / max_bytes`.
    pub utilization: f64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}
