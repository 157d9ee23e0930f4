//! Metrics instrumentation.
//!
//! Uses the `metrics` facade; the embedding process picks the exporter.
//! Without an installed recorder every call is a no-op.
//!
//! # Naming
//! - `asset_tiers_` prefix for all metrics
//! - `_total` suffix for counters, `_seconds` for latency histograms
//!
//! # Labels
//! - `tier`: remote, cache, local
//! - `operation`: get, put, exists, list, health
//! - `status`: success, or an error kind

use crate::models::{HealthStatus, Tier};
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record one tier call.
pub fn record_tier_request(tier: Tier, operation: &'static str, status: &'static str) {
    counter!(
        "asset_tiers_tier_requests_total",
        "tier" => tier.as_str(),
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// Record tier call latency.
pub fn record_tier_latency(tier: Tier, operation: &'static str, duration: Duration) {
    histogram!(
        "asset_tiers_tier_latency_seconds",
        "tier" => tier.as_str(),
        "operation" => operation
    )
    .record(duration.as_secs_f64());
}

/// Record a cache hit or miss.
pub fn record_cache_lookup(hit: bool) {
    counter!(
        "asset_tiers_cache_lookups_total",
        "result" => if hit { "hit" } else { "miss" }
    )
    .increment(1);
}

/// Record cache evictions by reason (`capacity`, `expired`).
pub fn record_cache_eviction(reason: &'static str, count: u64) {
    counter!("asset_tiers_cache_evictions_total", "reason" => reason).increment(count);
}

/// Record current cache footprint.
pub fn record_cache_size(entries: usize, bytes: u64) {
    gauge!("asset_tiers_cache_entries").set(entries as f64);
    gauge!("asset_tiers_cache_bytes").set(bytes as f64);
}

/// Record a migration item outcome (`migrated`, `skipped`, `failed`).
pub fn record_migration_item(status: &'static str) {
    counter!("asset_tiers_migration_items_total", "status" => status).increment(1);
}

/// Record a dispatched alert.
pub fn record_alert(severity: &'static str) {
    counter!("asset_tiers_alerts_total", "severity" => severity).increment(1);
}

/// Record the sampled overall health (0 healthy, 1 degraded, 2 unhealthy).
pub fn record_health(status: HealthStatus) {
    let value = match status {
        HealthStatus::Healthy => 0.0,
        HealthStatus::Degraded => 1.0,
        HealthStatus::Unhealthy => 2.0,
    };
    gauge!("asset_tiers_health_status").set(value);
}
