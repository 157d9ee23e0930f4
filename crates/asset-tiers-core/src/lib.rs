//! Asset Tiers - tiered media asset delivery and migration.
//!
//! Assets are served from a remote S3-compatible object store, an in-memory
//! TTL/LRU cache and the local filesystem, in that order, falling back to the
//! next tier whenever one fails or times out. A phased pipeline migrates the
//! local inventory to the remote store, and a health monitor samples the
//! tiers and raises deduplicated alerts.
//!
//! # Example
//!
//! ```rust,ignore
//! use asset_tiers::{AssetDelivery, DeliveryConfig};
//!
//! #[tokio::main]
//! async fn main() -> asset_tiers::Result<()> {
//!     let delivery = AssetDelivery::builder(DeliveryConfig::from_env("public/imgs"))
//!         .build()
//!         .await?;
//!
//!     let payload = delivery.get_asset("imgs/hero.webp").await?;
//!     println!("{} bytes from the {} tier", payload.size, payload.source);
//!
//!     let result = delivery.migrate_all().await;
//!     println!("migrated {}, failed {}", result.total_migrated, result.total_failed);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod local;
pub mod migration;
pub mod models;
pub mod monitor;
pub mod remote;
pub mod retrieval;
pub mod telemetry;

mod api;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheEntry, CacheStats, InMemoryAssetCache};
pub use config::{
    AlertChannelConfig, DeliveryConfig, MigrationConfig, MonitorConfig, RemoteStoreConfig,
    TierDefaults,
};
pub use error::{AssetError, Result};
pub use local::{InventoryScan, LocalAssetStore};
pub use migration::{AssetRegistry, MigrationPhase, MigrationPipeline, MigrationPlan};
pub use models::{
    Asset, AssetPayload, ConfigValidation, ExistsReport, HealthReport, HealthStatus,
    MigrationProgress, MigrationResult, MigrationState, PutOutcome, ReadinessReport,
    RollbackResult, Tier, VerificationReport,
};
pub use monitor::{Alert, AlertSink, HealthMonitor, MonitorSnapshot};
pub use remote::{DynObjectStore, InMemoryObjectStore, ObjectStore, S3ObjectStore};
pub use retrieval::{AssetRetrievalService, RetrievalOptions};

// Re-export builder from api module
pub use api::AssetDeliveryBuilder;

use std::sync::Arc;

/// Composition root owning every tier, the migration pipeline and the
/// health monitor.
///
/// Clones share all state.
#[derive(Clone)]
pub struct AssetDelivery {
    config: DeliveryConfig,
    service: AssetRetrievalService,
    pipeline: Arc<MigrationPipeline>,
    monitor: HealthMonitor,
}

impl AssetDelivery {
    /// Create a builder for AssetDelivery.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let delivery = AssetDelivery::builder(config)
    ///     .auto_create_dirs(true)
    ///     .build()
    ///     .await?;
    /// ```
    pub fn builder(config: DeliveryConfig) -> AssetDeliveryBuilder {
        AssetDeliveryBuilder::new(config)
    }

    /// Build with default options.
    pub async fn new(config: DeliveryConfig) -> Result<Self> {
        AssetDeliveryBuilder::new(config).build().await
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn service(&self) -> &AssetRetrievalService {
        &self.service
    }

    pub fn pipeline(&self) -> &Arc<MigrationPipeline> {
        &self.pipeline
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Check the configuration this instance runs with.
    ///
    /// Errors make the configuration unusable; warnings describe a reduced
    /// but working setup.
    pub fn validate_configuration(&self) -> ConfigValidation {
        validate_config(&self.config)
    }
}

/// Validate a configuration without building anything.
pub fn validate_config(config: &DeliveryConfig) -> ConfigValidation {
    let errors = config.validate();
    let mut warnings = Vec::new();

    if !config.remote.enabled {
        warnings.push("remote tier disabled; serving from cache and local only".to_string());
    } else if !config.remote.fallback_enabled {
        warnings.push("remote put failures will not fall back to local storage".to_string());
    }
    if !config.local_fallback_enabled {
        warnings.push("local fallback disabled".to_string());
    } else if !config.local_root.is_dir() {
        warnings.push(format!(
            "local root {} does not exist",
            config.local_root.display()
        ));
    }
    if config.cache.max_bytes < models::MAX_ASSET_BYTES {
        warnings.push(format!(
            "cache max_bytes {} is below the largest allowed asset ({} bytes)",
            config.cache.max_bytes,
            models::MAX_ASSET_BYTES
        ));
    }

    ConfigValidation {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}
