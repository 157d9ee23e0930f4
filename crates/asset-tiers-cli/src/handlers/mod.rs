//! Subcommand handlers, split by domain.
//!
//! Each handler returns `Ok(true)` on full success, `Ok(false)` when the
//! operation ran but reported failures, and `Err` when it could not run.

mod assets;
mod migration;
mod monitor;
mod shared;

use crate::Command;
use anyhow::Result;
use asset_tiers::{AssetDelivery, DeliveryConfig};
use shared::Output;

pub(crate) async fn run(command: Command, config: DeliveryConfig, json: bool) -> Result<bool> {
    let out = Output::new(json);

    // Validation must work on configurations too broken to build.
    if let Command::Validate = command {
        return assets::validate(&out, &config);
    }

    let delivery = AssetDelivery::builder(config).build().await?;
    match command {
        Command::Validate => assets::validate(&out, delivery.config()),
        Command::Health => assets::health(&out, &delivery).await,
        Command::Get { key, output } => assets::get(&out, &delivery, &key, output.as_deref()).await,
        Command::Put { path } => assets::put(&out, &delivery, &path).await,
        Command::Exists { key } => assets::exists(&out, &delivery, &key).await,
        Command::Migrate { plan_only: true } => migration::plan(&out, &delivery).await,
        Command::Migrate { plan_only: false } => migration::migrate(&out, &delivery).await,
        Command::Verify => migration::verify(&out, &delivery).await,
        Command::Rollback => migration::rollback(&out, &delivery).await,
        Command::Monitor => monitor::run(&out, &delivery).await,
    }
}
