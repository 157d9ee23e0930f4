//! Foreground health monitoring.

use super::shared::Output;
use anyhow::{Context, Result};
use asset_tiers::AssetDelivery;
use tracing::info;

pub(crate) async fn run(out: &Output, delivery: &AssetDelivery) -> Result<bool> {
    delivery.start_monitoring();
    info!(
        interval_ms = delivery.config().monitor.check_interval.as_millis() as u64,
        "Monitoring; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    delivery.stop_monitoring().await;

    let snapshot = delivery.monitoring_snapshot();
    out.report(&snapshot, || {
        println!(
            "{} samples, {} alerts sent, {} consecutive failures",
            snapshot.samples.len(),
            snapshot.alerts_sent,
            snapshot.consecutive_failures
        );
        println!(
            "Trends: latency {:?}, error rate {:?}, hit rate {:?}, memory {:?}",
            snapshot.trends.latency,
            snapshot.trends.error_rate,
            snapshot.trends.hit_rate,
            snapshot.trends.memory
        );
    })?;
    Ok(true)
}
