//! Builder for AssetDelivery with configurable options.

use crate::cache::InMemoryAssetCache;
use crate::config::DeliveryConfig;
use crate::error::{AssetError, Result};
use crate::local::LocalAssetStore;
use crate::migration::{AssetRegistry, MigrationPipeline};
use crate::models::Tier;
use crate::monitor::{sinks_from_config, AlertSink, HealthMonitor};
use crate::remote::{CircuitBreaker, CircuitBreakerConfig, DynObjectStore, S3ObjectStore};
use crate::retrieval::{AssetRetrievalService, RetrievalOptions};
use crate::AssetDelivery;
use std::sync::Arc;
use tracing::{info, warn};

/// Builder for creating an AssetDelivery instance with custom options.
///
/// # Example
///
/// ```rust,ignore
/// use asset_tiers::{AssetDeliveryBuilder, DeliveryConfig};
///
/// let delivery = AssetDeliveryBuilder::new(DeliveryConfig::from_env("public/imgs"))
///     .auto_create_dirs(true)
///     .build()
///     .await?;
/// ```
pub struct AssetDeliveryBuilder {
    config: DeliveryConfig,
    auto_create_dirs: bool,
    remote_store: Option<DynObjectStore>,
    alert_sinks: Option<Vec<Arc<dyn AlertSink>>>,
    circuit_breaker: Option<CircuitBreakerConfig>,
}

impl AssetDeliveryBuilder {
    pub fn new(config: DeliveryConfig) -> Self {
        Self {
            config,
            auto_create_dirs: false,
            remote_store: None,
            alert_sinks: None,
            circuit_breaker: None,
        }
    }

    /// Create the local root if it doesn't exist.
    ///
    /// Default: `false` (a missing root is logged and reported by health checks)
    pub fn auto_create_dirs(mut self, enable: bool) -> Self {
        self.auto_create_dirs = enable;
        self
    }

    /// Use this object store for the remote tier instead of building an S3
    /// client from the configuration. The remote tier counts as enabled.
    pub fn with_remote_store(mut self, store: DynObjectStore) -> Self {
        self.remote_store = Some(store);
        self
    }

    /// Replace the alert channels named in the monitor configuration.
    pub fn with_alert_sinks(mut self, sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        self.alert_sinks = Some(sinks);
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Build the AssetDelivery instance.
    pub async fn build(self) -> Result<AssetDelivery> {
        let config = self.config;
        config.ensure_valid()?;

        let local_root = &config.local_root;
        if self.auto_create_dirs {
            tokio::fs::create_dir_all(local_root)
                .await
                .map_err(|e| AssetError::io_with_path(e, local_root))?;
        } else if !local_root.is_dir() {
            warn!("Local asset root does not exist: {}", local_root.display());
        }

        let remote = match self.remote_store {
            Some(store) => Some(store),
            None if config.remote.enabled => Some(Arc::new(S3ObjectStore::with_timeout(
                config.remote.clone(),
                config.tier_timeout,
            )?) as DynObjectStore),
            None => None,
        };

        let mut service = AssetRetrievalService::new(
            remote,
            InMemoryAssetCache::new(config.cache.clone()),
            LocalAssetStore::new(local_root),
            RetrievalOptions::from(&config),
        );
        if let Some(breaker) = self.circuit_breaker {
            service = service.with_circuit_breaker(CircuitBreaker::with_config(Tier::Remote, breaker));
        }

        let pipeline = Arc::new(MigrationPipeline::new(
            service.clone(),
            Arc::new(AssetRegistry::default()),
            config.migration.clone(),
        ));

        let sinks = match self.alert_sinks {
            Some(sinks) => sinks,
            None => sinks_from_config(&config.monitor.alert_channels)?,
        };
        let monitor = HealthMonitor::new(service.clone(), config.monitor.clone(), sinks);

        info!(
            remote = service.remote().is_some(),
            local_root = %local_root.display(),
            local_fallback = config.local_fallback_enabled,
            "Asset delivery initialized"
        );

        Ok(AssetDelivery {
            config,
            service,
            pipeline,
            monitor,
        })
    }
}
