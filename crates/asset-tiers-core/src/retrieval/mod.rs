//! Tiered asset retrieval.
//!
//! `get_asset` walks the tiers in a fixed order, one at a time:
//!
//! 1. remote object store (when enabled and its circuit is not open)
//! 2. in-memory cache
//! 3. local filesystem (when local fallback is enabled)
//!
//! Every tier call is bounded by the tier timeout. A timeout, an error or a
//! miss moves on to the next tier; only exhaustion of all three reaches the
//! caller as [`AssetError::AssetUnavailable`].

mod single_flight;

pub use single_flight::SingleFlight;

use crate::cache::{CacheEntry, CacheStats, InMemoryAssetCache};
use crate::config::{DeliveryConfig, TierDefaults};
use crate::error::{AssetError, Result};
use crate::local::LocalAssetStore;
use crate::models::{
    filename_from_key, remote_key_for, AssetPayload, ExistsReport, HealthReport, HealthStatus,
    PutOutcome, Tier, TierHealth,
};
use crate::remote::{CircuitBreaker, DynObjectStore, RemoteHealth};
use crate::telemetry;
use bytes::Bytes;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Behaviour switches for the retrieval service.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub tier_timeout: Duration,
    pub local_fallback_enabled: bool,
    /// Write to the local store when a remote put fails.
    pub remote_fallback_enabled: bool,
    pub coalesce_requests: bool,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            tier_timeout: TierDefaults::TIER_TIMEOUT,
            local_fallback_enabled: true,
            remote_fallback_enabled: true,
            coalesce_requests: true,
        }
    }
}

impl From<&DeliveryConfig> for RetrievalOptions {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            tier_timeout: config.tier_timeout,
            local_fallback_enabled: config.local_fallback_enabled,
            remote_fallback_enabled: config.remote.fallback_enabled,
            coalesce_requests: config.coalesce_requests,
        }
    }
}

/// Orchestrates the remote, cache and local tiers.
///
/// Cheap to clone; clones share the stores, the circuit breaker and the
/// single-flight table.
#[derive(Clone)]
pub struct AssetRetrievalService {
    remote: Option<DynObjectStore>,
    cache: InMemoryAssetCache,
    local: LocalAssetStore,
    breaker: Arc<CircuitBreaker>,
    flights: Arc<SingleFlight<AssetPayload>>,
    options: RetrievalOptions,
}

impl AssetRetrievalService {
    /// `remote` is `None` when the remote tier is disabled.
    pub fn new(
        remote: Option<DynObjectStore>,
        cache: InMemoryAssetCache,
        local: LocalAssetStore,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            remote,
            cache,
            local,
            breaker: Arc::new(CircuitBreaker::new(Tier::Remote)),
            flights: Arc::new(SingleFlight::new()),
            options,
        }
    }

    /// Replace the remote circuit breaker.
    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Arc::new(breaker);
        self
    }

    pub fn remote(&self) -> Option<&DynObjectStore> {
        self.remote.as_ref()
    }

    pub fn cache(&self) -> &InMemoryAssetCache {
        &self.cache
    }

    pub fn local(&self) -> &LocalAssetStore {
        &self.local
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    /// Fetch an asset, falling back tier by tier.
    pub async fn get_asset(&self, key: &str) -> Result<AssetPayload> {
        if !self.options.coalesce_requests {
            return self.traverse(key).await;
        }
        let this = self.clone();
        let owned = key.to_string();
        self.flights
            .run(key, move || async move { this.traverse(&owned).await })
            .await
    }

    async fn traverse(&self, key: &str) -> Result<AssetPayload> {
        let remote_err = match self.get_remote(key).await {
            Ok(payload) => {
                self.write_through_detached(&payload);
                return Ok(payload);
            }
            Err(e) => e,
        };

        let cache_err = match self.get_cached(key) {
            Ok(payload) => return Ok(payload),
            Err(e) => e,
        };

        let local_err = match self.get_local(key).await {
            Ok(payload) => {
                if let Err(e) = self.cache.set(entry_from_payload(&payload)) {
                    warn!(key, error = %e, "Cache write-through from local tier failed");
                }
                return Ok(payload);
            }
            Err(e) => e,
        };

        warn!(
            key,
            remote = %remote_err,
            cache = %cache_err,
            local = %local_err,
            "Asset unavailable from every tier"
        );
        Err(AssetError::AssetUnavailable {
            key: key.to_string(),
            remote: Box::new(remote_err),
            cache: Box::new(cache_err),
            local: Box::new(local_err),
        })
    }

    async fn get_remote(&self, key: &str) -> Result<AssetPayload> {
        let Some(remote) = &self.remote else {
            return Err(AssetError::TierDisabled { tier: Tier::Remote });
        };
        if !self.breaker.allow_request() {
            telemetry::record_tier_request(Tier::Remote, "get", "circuit_open");
            return Err(AssetError::CircuitOpen { tier: Tier::Remote });
        }

        let result = self
            .bounded(Tier::Remote, remote.get(key))
            .await
            .map(|object| AssetPayload {
                key: key.to_string(),
                bytes: object.bytes,
                content_type: object.content_type,
                size: object.size,
                last_modified: object.last_modified,
                etag: object.etag,
                source: Tier::Remote,
            });

        match &result {
            Err(e) if e.counts_as_tier_failure() => self.breaker.record_failure(),
            _ => self.breaker.record_success(),
        }
        if let Err(e) = &result {
            debug!(key, error = %e, "Remote tier miss");
        }
        result
    }

    fn get_cached(&self, key: &str) -> Result<AssetPayload> {
        let started = Instant::now();
        let result = match self.cache.get(key) {
            Ok(Some(entry)) => Ok(payload_from_entry(entry, Tier::Cache)),
            Ok(None) => Err(AssetError::NotFound {
                tier: Tier::Cache,
                key: key.to_string(),
            }),
            Err(e) => Err(e),
        };
        observe(Tier::Cache, "get", started, &result);
        result
    }

    async fn get_local(&self, key: &str) -> Result<AssetPayload> {
        if !self.options.local_fallback_enabled {
            return Err(AssetError::TierDisabled { tier: Tier::Local });
        }
        let started = Instant::now();
        let result = self.bounded(Tier::Local, self.local.get(key)).await;
        observe(Tier::Local, "get", started, &result);
        result
    }

    /// Run a tier call under the tier timeout. A timeout is a tier failure.
    async fn bounded<T>(&self, tier: Tier, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.options.tier_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    %tier,
                    timeout_ms = self.options.tier_timeout.as_millis() as u64,
                    "Tier call timed out"
                );
                Err(AssetError::Timeout {
                    tier,
                    duration: self.options.tier_timeout,
                })
            }
        }
    }

    /// Populate the cache from a remote read without holding up the caller.
    fn write_through_detached(&self, payload: &AssetPayload) {
        let cache = self.cache.clone();
        let entry = entry_from_payload(payload);
        tokio::spawn(async move {
            let key = entry.key.clone();
            if let Err(e) = cache.set(entry) {
                debug!(key = %key, error = %e, "Cache write-through from remote tier failed");
            }
        });
    }

    /// Serve from the cache, stale or not, refreshing from the durable tiers
    /// in the background once the entry nears expiry.
    ///
    /// On a cache miss the durable tiers are read inline.
    pub async fn get_asset_with_refresh(&self, key: &str) -> Result<AssetPayload> {
        let this = self.clone();
        let owned = key.to_string();
        let entry = self
            .cache
            .get_with_background_refresh(key, move || async move {
                this.fetch_durable(&owned)
                    .await
                    .map(|payload| entry_from_payload(&payload))
            })
            .await?;
        Ok(payload_from_entry(entry, Tier::Cache))
    }

    /// Read from remote, then local, skipping the cache.
    async fn fetch_durable(&self, key: &str) -> Result<AssetPayload> {
        match self.get_remote(key).await {
            Ok(payload) => Ok(payload),
            Err(remote_err) => self.get_local(key).await.map_err(|local_err| {
                AssetError::AssetUnavailable {
                    key: key.to_string(),
                    remote: Box::new(remote_err),
                    cache: Box::new(AssetError::NotFound {
                        tier: Tier::Cache,
                        key: key.to_string(),
                    }),
                    local: Box::new(local_err),
                }
            }),
        }
    }

    /// Store an asset.
    ///
    /// Writes to the remote tier when enabled. When that fails and fallback
    /// is enabled the bytes go to the local store instead. The payload is
    /// cached once a durable tier has accepted it.
    pub async fn put_asset(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<PutOutcome> {
        let expected = remote_key_for(filename_from_key(key))?;
        if expected != key {
            return Err(AssetError::Validation {
                field: "key".into(),
                message: format!("'{}' is not of the form {}", key, expected),
            });
        }

        let mut tiers_written = Vec::new();
        let mut public_url = None;
        let mut last_err = None;

        if let Some(remote) = &self.remote {
            let started = Instant::now();
            let result = if self.breaker.allow_request() {
                let result = self
                    .bounded(Tier::Remote, remote.put(key, bytes.clone(), content_type))
                    .await;
                match &result {
                    Ok(_) => self.breaker.record_success(),
                    Err(_) => self.breaker.record_failure(),
                }
                result
            } else {
                Err(AssetError::CircuitOpen { tier: Tier::Remote })
            };
            observe(Tier::Remote, "put", started, &result);
            match result {
                Ok(url) => {
                    tiers_written.push(Tier::Remote);
                    public_url = Some(url);
                }
                Err(e) => {
                    warn!(key, error = %e, "Remote put failed");
                    last_err = Some(e);
                }
            }
        }

        let wants_local = match &self.remote {
            None => true,
            Some(_) => tiers_written.is_empty() && self.options.remote_fallback_enabled,
        };
        if wants_local && self.options.local_fallback_enabled {
            let started = Instant::now();
            let result = self.bounded(Tier::Local, self.local.put(key, &bytes)).await;
            observe(Tier::Local, "put", started, &result);
            match result {
                Ok(_) => tiers_written.push(Tier::Local),
                Err(e) => {
                    warn!(key, error = %e, "Local put failed");
                    last_err = Some(e);
                }
            }
        }

        if tiers_written.is_empty() {
            return Err(last_err.unwrap_or_else(|| {
                AssetError::unavailable(Tier::Local, "no durable tier is enabled")
            }));
        }

        let entry = CacheEntry::new(key, bytes, content_type, Utc::now());
        match self.cache.set(entry) {
            Ok(()) => tiers_written.push(Tier::Cache),
            Err(e) => warn!(key, error = %e, "Failed to cache stored asset"),
        }

        info!(key, tiers = ?tiers_written, "Stored asset");
        Ok(PutOutcome {
            key: key.to_string(),
            tiers_written,
            public_url,
        })
    }

    /// Presence of a key in each tier, checked independently.
    pub async fn image_exists(&self, key: &str) -> ExistsReport {
        let remote = async {
            match &self.remote {
                Some(remote) => tokio::time::timeout(self.options.tier_timeout, remote.exists(key))
                    .await
                    .unwrap_or(false),
                None => false,
            }
        };
        let local = async {
            if self.options.local_fallback_enabled {
                self.local.exists(key).await
            } else {
                false
            }
        };
        let (remote, local) = tokio::join!(remote, local);
        let cache = self.cache.contains(key).unwrap_or(false);
        ExistsReport {
            remote,
            cache,
            local,
        }
    }

    /// Drop a key from the cache.
    pub fn invalidate(&self, key: &str) -> Result<bool> {
        self.cache.delete(key)
    }

    /// Check every enabled tier and aggregate.
    pub async fn get_health_status(&self) -> HealthReport {
        let remote = match &self.remote {
            Some(remote) => Some(self.remote_health(remote).await.into_tier_health()),
            None => None,
        };

        // Entries that expired unread are garbage, not a cache fault.
        if let Err(e) = self.cache.evict_expired() {
            warn!(error = %e, "Failed to sweep expired cache entries");
        }
        let cache_stats = self.cache.stats().unwrap_or_default();
        let cache = cache_health(&cache_stats);
        telemetry::record_cache_size(cache_stats.total_entries, cache_stats.total_bytes);

        let local = if self.options.local_fallback_enabled {
            Some(self.local.health().await)
        } else {
            None
        };

        let overall = HealthStatus::worst(
            remote
                .iter()
                .chain(std::iter::once(&cache))
                .chain(local.iter())
                .map(|h| h.status),
        );
        telemetry::record_health(overall);

        HealthReport {
            overall,
            remote,
            cache,
            local,
            cache_stats,
            checked_at: Utc::now(),
        }
    }

    /// Remote health check under the tier timeout.
    pub async fn remote_health(&self, remote: &DynObjectStore) -> RemoteHealth {
        match tokio::time::timeout(self.options.tier_timeout, remote.health()).await {
            Ok(health) => health,
            Err(_) => RemoteHealth::failed(
                self.options.tier_timeout,
                format!("health check timed out after {:?}", self.options.tier_timeout),
            ),
        }
    }
}

/// Classify cache health from its statistics.
///
/// Unhealthy when more than half the resident entries are expired. Degraded
/// when utilization is above 90%, or when the hit rate is below 80% once
/// there has been at least one lookup.
pub fn cache_health(stats: &CacheStats) -> TierHealth {
    let expired_ratio = if stats.total_entries > 0 {
        stats.expired_entries as f64 / stats.total_entries as f64
    } else {
        0.0
    };

    let (status, message) = if expired_ratio > 0.5 {
        (
            HealthStatus::Unhealthy,
            Some(format!(
                "{} of {} entries expired",
                stats.expired_entries, stats.total_entries
            )),
        )
    } else if stats.utilization > TierDefaults::CACHE_HEALTHY_UTILIZATION {
        (
            HealthStatus::Degraded,
            Some(format!("utilization {:.0}%", stats.utilization * 100.0)),
        )
    } else if stats.lookups() > 0 && stats.hit_rate < TierDefaults::CACHE_HEALTHY_HIT_RATE {
        (
            HealthStatus::Degraded,
            Some(format!("hit rate {:.0}%", stats.hit_rate * 100.0)),
        )
    } else {
        (HealthStatus::Healthy, None)
    };

    TierHealth {
        tier: Tier::Cache,
        status,
        response_time_ms: 0,
        message,
    }
}

fn entry_from_payload(payload: &AssetPayload) -> CacheEntry {
    CacheEntry::new(
        payload.key.clone(),
        payload.bytes.clone(),
        payload.content_type.clone(),
        payload.last_modified,
    )
    .with_etag(payload.etag.clone())
}

fn payload_from_entry(entry: CacheEntry, source: Tier) -> AssetPayload {
    AssetPayload {
        key: entry.key,
        size: entry.size,
        bytes: entry.payload,
        content_type: entry.content_type,
        last_modified: entry.last_modified,
        etag: entry.etag,
        source,
    }
}

fn observe<T>(tier: Tier, operation: &'static str, started: Instant, result: &Result<T>) {
    let status = match result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    };
    telemetry::record_tier_request(tier, operation, status);
    telemetry::record_tier_latency(tier, operation, started.elapsed());
}
