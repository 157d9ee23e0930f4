//! Centralized configuration for the asset delivery engine.
//!
//! Tuning constants live in [`TierDefaults`]; runtime settings are plain
//! serde structs that load from a JSON file or from the environment and are
//! validated once at startup. Missing or malformed settings fail fast with
//! [`AssetError::Configuration`].

use crate::cache::CacheConfig;
use crate::error::{AssetError, Result};
use crate::remote::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default tuning values.
pub struct TierDefaults;

impl TierDefaults {
    pub const TIER_TIMEOUT: Duration = Duration::from_millis(5000);
    pub const REMOTE_HEALTHY_LATENCY: Duration = Duration::from_millis(1000);
    pub const REMOTE_REGION: &'static str = "auto";
    pub const REMOTE_USER_AGENT: &'static str = "asset-tiers/0.3";
    pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
    pub const CIRCUIT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

    pub const CACHE_MAX_BYTES: u64 = 100 * 1024 * 1024;
    pub const CACHE_MAX_ENTRIES: usize = 1000;
    pub const CACHE_DEFAULT_TTL: Duration = Duration::from_secs(3600);
    /// Fraction of TTL after which a background refresh is scheduled.
    pub const CACHE_REFRESH_FRACTION: f64 = 0.8;
    pub const CACHE_HEALTHY_HIT_RATE: f64 = 0.8;
    pub const CACHE_HEALTHY_UTILIZATION: f64 = 0.9;

    pub const MONITOR_CHECK_INTERVAL: Duration = Duration::from_secs(60);
    pub const MONITOR_ERROR_THRESHOLD: u32 = 3;
    pub const MONITOR_ERROR_RATE_THRESHOLD: f64 = 0.5;
    pub const MONITOR_RESPONSE_TIME_THRESHOLD: Duration = Duration::from_millis(2000);
    pub const MONITOR_WINDOW_SIZE: usize = 100;
    pub const MONITOR_ERROR_RATE_SAMPLES: usize = 10;
    pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

    pub const MIGRATION_INTER_PHASE_DELAY: Duration = Duration::from_secs(30);
    pub const MIGRATION_PILOT_SIZE: usize = 5;
    pub const MIGRATION_UPLOADS_PER_SECOND: u32 = 10;
    /// Planning estimate per asset, used for phase duration estimates.
    pub const MIGRATION_SECONDS_PER_ASSET: u64 = 3;
}

/// Serialize `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Settings for the S3-compatible remote object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteStoreConfig {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    #[serde(rename = "publicBaseURL", alias = "publicBaseUrl")]
    pub public_base_url: String,
    pub region: String,
    /// Explicit endpoint; derived from the account id when empty.
    pub endpoint: String,
    pub enabled: bool,
    pub fallback_enabled: bool,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            bucket_name: String::new(),
            public_base_url: String::new(),
            region: TierDefaults::REMOTE_REGION.to_string(),
            endpoint: String::new(),
            enabled: false,
            fallback_enabled: true,
        }
    }
}

impl RemoteStoreConfig {
    /// Load from `R2_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).unwrap_or_default();
        let flag = |name: &str, default: bool| {
            lookup(name)
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(default)
        };

        let region = get("R2_REGION");
        Self {
            account_id: get("R2_ACCOUNT_ID"),
            access_key_id: get("R2_ACCESS_KEY_ID"),
            secret_access_key: get("R2_SECRET_ACCESS_KEY"),
            bucket_name: get("R2_BUCKET_NAME"),
            public_base_url: get("R2_PUBLIC_URL"),
            region: if region.is_empty() {
                defaults.region
            } else {
                region
            },
            endpoint: get("R2_ENDPOINT"),
            enabled: flag("R2_ENABLED", false),
            fallback_enabled: flag("R2_FALLBACK_ENABLED", true),
        }
    }

    /// Endpoint URL, derived from the account id when not set explicitly.
    pub fn resolved_endpoint(&self) -> String {
        if self.endpoint.is_empty() {
            format!("https://{}.r2.cloudflarestorage.com", self.account_id)
        } else {
            self.endpoint.trim_end_matches('/').to_string()
        }
    }

    /// Collect every configuration problem. Empty means valid.
    ///
    /// A disabled remote tier needs no credentials.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.enabled {
            return errors;
        }

        let required = [
            ("accountId", &self.account_id),
            ("accessKeyId", &self.access_key_id),
            ("secretAccessKey", &self.secret_access_key),
            ("bucketName", &self.bucket_name),
            ("publicBaseURL", &self.public_base_url),
        ];
        for (name, value) in required {
            // Account id only matters when the endpoint is derived from it.
            if name == "accountId" && !self.endpoint.is_empty() {
                continue;
            }
            if value.is_empty() {
                errors.push(format!("{} is required when the remote tier is enabled", name));
            }
        }

        if !self.public_base_url.is_empty() {
            if let Err(e) = url::Url::parse(&self.public_base_url) {
                errors.push(format!("publicBaseURL is not a valid URL: {}", e));
            }
        }
        if !self.endpoint.is_empty() {
            if let Err(e) = url::Url::parse(&self.endpoint) {
                errors.push(format!("endpoint is not a valid URL: {}", e));
            }
        }
        if self.region.is_empty() {
            errors.push("region must not be empty".to_string());
        }
        errors
    }

    /// Fail fast on the first validation pass.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AssetError::config(errors.join("; ")))
        }
    }
}

/// Where alerts are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertChannelConfig {
    /// Structured log sink.
    Console,
    /// JSON POST of `{timestamp, severity, message, metrics}`.
    Webhook { url: String },
}

/// Health monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    #[serde(with = "duration_ms", rename = "check_interval_ms")]
    pub check_interval: Duration,
    pub error_threshold: u32,
    pub error_rate_threshold: f64,
    #[serde(with = "duration_ms", rename = "response_time_threshold_ms")]
    pub response_time_threshold: Duration,
    pub alert_channels: Vec<AlertChannelConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: TierDefaults::MONITOR_CHECK_INTERVAL,
            error_threshold: TierDefaults::MONITOR_ERROR_THRESHOLD,
            error_rate_threshold: TierDefaults::MONITOR_ERROR_RATE_THRESHOLD,
            response_time_threshold: TierDefaults::MONITOR_RESPONSE_TIME_THRESHOLD,
            alert_channels: vec![AlertChannelConfig::Console],
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.check_interval.is_zero() {
            errors.push("monitor check interval must be positive".to_string());
        }
        if self.error_threshold == 0 {
            errors.push("monitor error threshold must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            errors.push("monitor error rate threshold must be within 0..=1".to_string());
        }
        for channel in &self.alert_channels {
            if let AlertChannelConfig::Webhook { url } = channel {
                if let Err(e) = url::Url::parse(url) {
                    errors.push(format!("webhook URL '{}' is invalid: {}", url, e));
                }
            }
        }
        errors
    }
}

/// Migration pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    #[serde(with = "duration_ms", rename = "inter_phase_delay_ms")]
    pub inter_phase_delay: Duration,
    pub pilot_phase_size: usize,
    pub retry: RetryConfig,
    pub max_uploads_per_second: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            inter_phase_delay: TierDefaults::MIGRATION_INTER_PHASE_DELAY,
            pilot_phase_size: TierDefaults::MIGRATION_PILOT_SIZE,
            retry: RetryConfig::default(),
            max_uploads_per_second: TierDefaults::MIGRATION_UPLOADS_PER_SECOND,
        }
    }
}

/// Top-level configuration owned by the composition root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Root of the local asset inventory.
    pub local_root: PathBuf,
    pub local_fallback_enabled: bool,
    #[serde(with = "duration_ms", rename = "tier_timeout_ms")]
    pub tier_timeout: Duration,
    /// Share one tier traversal between concurrent requests for a key.
    pub coalesce_requests: bool,
    pub remote: RemoteStoreConfig,
    pub cache: CacheConfig,
    pub monitor: MonitorConfig,
    pub migration: MigrationConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            local_root: PathBuf::from("public/imgs"),
            local_fallback_enabled: true,
            tier_timeout: TierDefaults::TIER_TIMEOUT,
            coalesce_requests: true,
            remote: RemoteStoreConfig::default(),
            cache: CacheConfig::default(),
            monitor: MonitorConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

impl DeliveryConfig {
    /// Load from a JSON file. Absent fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| AssetError::io_with_path(e, path))?;
        serde_json::from_str(&contents).map_err(|e| {
            AssetError::config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Defaults plus remote settings from the environment.
    pub fn from_env(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            remote: RemoteStoreConfig::from_env(),
            ..Self::default()
        }
    }

    /// Collect every problem across sections.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.remote.validate();
        errors.extend(self.cache.validate());
        errors.extend(self.monitor.validate());
        if self.tier_timeout.is_zero() {
            errors.push("tier timeout must be positive".to_string());
        }
        if !self.remote.enabled && !self.local_fallback_enabled {
            errors.push("at least one durable tier (remote or local) must be enabled".to_string());
        }
        if self.migration.max_uploads_per_second == 0 {
            errors.push("migration upload rate must be at least 1 per second".to_string());
        }
        errors
    }

    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AssetError::config(errors.join("; ")))
        }
    }
}
