//! Basic usage example - store and fetch an asset in a local-only setup

use asset_tiers::{AssetDelivery, DeliveryConfig, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Get path from args or use a scratch directory
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./example-assets".to_string());

    println!("Initializing AssetDelivery with local root: {}", path);

    let delivery = AssetDelivery::builder(DeliveryConfig::from_env(&path))
        .auto_create_dirs(true)
        .build()
        .await?;

    let outcome = delivery
        .put_asset("imgs/example.png", &b"example bytes"[..], "image/png")
        .await?;
    println!("Stored {} in {:?}", outcome.key, outcome.tiers_written);

    let payload = delivery.get_asset("imgs/example.png").await?;
    println!("Fetched {} bytes from the {} tier", payload.size, payload.source);

    let health = delivery.health().await;
    println!("Overall health: {}", health.overall);

    Ok(())
}
