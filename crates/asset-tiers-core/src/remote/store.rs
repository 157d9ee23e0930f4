//! Remote object store contract.

use crate::config::TierDefaults;
use crate::error::Result;
use crate::models::{HealthStatus, Tier, TierHealth};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An object read from the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectData {
    pub bytes: Bytes,
    pub content_type: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: Option<String>,
}

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Result of a remote health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteHealth {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RemoteHealth {
    /// Classify a completed check: healthy under one second, else degraded.
    pub fn from_latency(latency: Duration) -> Self {
        let status = if latency < TierDefaults::REMOTE_HEALTHY_LATENCY {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        Self {
            status,
            latency_ms: latency.as_millis() as u64,
            message: None,
        }
    }

    /// A failed check.
    pub fn failed(latency: Duration, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms: latency.as_millis() as u64,
            message: Some(message.into()),
        }
    }

    pub fn into_tier_health(self) -> TierHealth {
        TierHealth {
            tier: Tier::Remote,
            status: self.status,
            response_time_ms: self.latency_ms,
            message: self.message,
        }
    }
}

/// Client for an S3-compatible object store.
///
/// Implementations perform no retries; callers own retry policy.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object. Fails with `NotFound` or `StorageUnavailable`.
    async fn get(&self, key: &str) -> Result<ObjectData>;

    /// Store an object and return its public URL.
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String>;

    /// Whether an object exists. Errors map to `false`.
    async fn exists(&self, key: &str) -> bool;

    /// List up to `max_keys` objects under `prefix`.
    async fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<ObjectSummary>>;

    /// Check the store with a trivial request.
    async fn health(&self) -> RemoteHealth;

    /// Public URL of a key (`<publicBaseURL>/<key>`).
    fn public_url(&self, key: &str) -> String;
}

/// Shared handle to any object store.
pub type DynObjectStore = std::sync::Arc<dyn ObjectStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_classification() {
        assert_eq!(
            RemoteHealth::from_latency(Duration::from_millis(120)).status,
            HealthStatus::Healthy
        );
        assert_eq!(
            RemoteHealth::from_latency(Duration::from_millis(1500)).status,
            HealthStatus::Degraded
        );
        let failed = RemoteHealth::failed(Duration::from_millis(5), "connection refused");
        assert_eq!(failed.status, HealthStatus::Unhealthy);
        assert_eq!(failed.into_tier_health().tier, Tier::Remote);
    }
}
