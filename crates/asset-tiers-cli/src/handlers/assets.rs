//! validate, health, get, put and exists.

use super::shared::{print_messages, Output};
use anyhow::{Context, Result};
use asset_tiers::{validate_config, AssetDelivery, DeliveryConfig, HealthStatus};
use serde_json::json;
use std::path::Path;

pub(crate) fn validate(out: &Output, config: &DeliveryConfig) -> Result<bool> {
    let report = validate_config(config);
    out.report(&report, || {
        if report.valid {
            println!("Configuration is valid");
        } else {
            println!("Configuration is invalid");
        }
        print_messages("ERROR", &report.errors);
        print_messages("WARN ", &report.warnings);
    })?;
    Ok(report.valid)
}

pub(crate) async fn health(out: &Output, delivery: &AssetDelivery) -> Result<bool> {
    let report = delivery.health().await;
    out.report(&report, || {
        println!("Overall: {}", report.overall);
        for tier in report
            .remote
            .iter()
            .chain(std::iter::once(&report.cache))
            .chain(report.local.iter())
        {
            match &tier.message {
                Some(message) => println!(
                    "  {:<6} {:<9} {:>5}ms  {}",
                    tier.tier, tier.status, tier.response_time_ms, message
                ),
                None => println!(
                    "  {:<6} {:<9} {:>5}ms",
                    tier.tier, tier.status, tier.response_time_ms
                ),
            }
        }
        println!(
            "  cache: {} entries, {} bytes, hit rate {:.1}%",
            report.cache_stats.total_entries,
            report.cache_stats.total_bytes,
            report.cache_stats.hit_rate * 100.0
        );
    })?;
    Ok(report.overall != HealthStatus::Unhealthy)
}

pub(crate) async fn get(
    out: &Output,
    delivery: &AssetDelivery,
    key: &str,
    output: Option<&Path>,
) -> Result<bool> {
    let payload = delivery.get_asset(key).await?;
    if let Some(path) = output {
        tokio::fs::write(path, &payload.bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
    }

    let summary = json!({
        "key": payload.key,
        "size": payload.size,
        "content_type": payload.content_type,
        "etag": payload.etag,
        "last_modified": payload.last_modified,
        "source": payload.source,
    });
    out.report(&summary, || {
        println!(
            "{} ({} bytes, {}) served from {}",
            payload.key, payload.size, payload.content_type, payload.source
        );
        if let Some(path) = output {
            println!("  written to {}", path.display());
        }
    })?;
    Ok(true)
}

pub(crate) async fn put(out: &Output, delivery: &AssetDelivery, path: &Path) -> Result<bool> {
    let outcome = delivery.put_file(path).await?;
    out.report(&outcome, || {
        let tiers: Vec<String> = outcome.tiers_written.iter().map(|t| t.to_string()).collect();
        println!("Stored {} in {}", outcome.key, tiers.join(", "));
        if let Some(url) = &outcome.public_url {
            println!("  {}", url);
        }
    })?;
    Ok(true)
}

pub(crate) async fn exists(out: &Output, delivery: &AssetDelivery, key: &str) -> Result<bool> {
    let report = delivery.exists(key).await;
    out.report(&report, || {
        println!(
            "{}: remote={} cache={} local={}",
            key, report.remote, report.cache, report.local
        );
    })?;
    Ok(report.any())
}
