//! Error types for the asset delivery engine.
//!
//! Tier-level failures are values the retrieval service inspects to decide on
//! fallback. Only exhaustion of every tier reaches the caller, as
//! [`AssetError::AssetUnavailable`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::models::Tier;

/// Main error type for the asset delivery engine.
///
/// Errors are `Clone` so a single-flight fetch can hand the same failure to
/// every waiting caller.
#[derive(Debug, Clone, Error)]
pub enum AssetError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // Tier errors
    #[error("{tier} tier unavailable: {message}")]
    StorageUnavailable { tier: Tier, message: String },

    #[error("{tier} tier timed out after {duration:?}")]
    Timeout { tier: Tier, duration: Duration },

    #[error("{key} not found in {tier} tier")]
    NotFound { tier: Tier, key: String },

    #[error("Circuit breaker open for {tier} tier")]
    CircuitOpen { tier: Tier },

    #[error("Asset {key} unavailable from every tier (remote: {remote}; cache: {cache}; local: {local})")]
    AssetUnavailable {
        key: String,
        remote: Box<AssetError>,
        cache: Box<AssetError>,
        local: Box<AssetError>,
    },

    #[error("{tier} tier disabled")]
    TierDisabled { tier: Tier },

    // Cache errors
    #[error("Cache error: {message}")]
    Cache { message: String },

    // Migration errors
    #[error("Migration of {key} failed: {message}")]
    MigrationItem { key: String, message: String },

    #[error("Rollback of {key} failed: {message}")]
    Rollback { key: String, message: String },

    #[error("Invalid state transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: String,
        to: String,
    },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    // Network errors
    #[error("Network error: {message}")]
    Network { message: String },
}

/// Result type alias for asset operations.
pub type Result<T> = std::result::Result<T, AssetError>;

impl From<std::io::Error> for AssetError {
    fn from(err: std::io::Error) -> Self {
        AssetError::Io {
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<serde_json::Error> for AssetError {
    fn from(err: serde_json::Error) -> Self {
        AssetError::Json {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for AssetError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AssetError::Timeout {
                tier: Tier::Remote,
                duration: Duration::from_secs(0),
            }
        } else {
            AssetError::StorageUnavailable {
                tier: Tier::Remote,
                message: err.to_string(),
            }
        }
    }
}

impl AssetError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        AssetError::Io {
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        AssetError::Configuration {
            message: message.into(),
        }
    }

    /// Create a tier-unavailable error.
    pub fn unavailable(tier: Tier, message: impl Into<String>) -> Self {
        AssetError::StorageUnavailable {
            tier,
            message: message.into(),
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AssetError::StorageUnavailable { .. }
                | AssetError::Timeout { .. }
                | AssetError::Network { .. }
        )
    }

    /// Check if this error means the object is absent (terminal for a tier).
    pub fn is_not_found(&self) -> bool {
        matches!(self, AssetError::NotFound { .. })
    }

    /// Whether the retrieval service should move on to the next tier.
    pub fn is_fallback_trigger(&self) -> bool {
        matches!(
            self,
            AssetError::StorageUnavailable { .. }
                | AssetError::Timeout { .. }
                | AssetError::NotFound { .. }
                | AssetError::CircuitOpen { .. }
                | AssetError::TierDisabled { .. }
                | AssetError::Cache { .. }
                | AssetError::Io { .. }
                | AssetError::Network { .. }
        )
    }

    /// Whether the error counts against a tier's circuit breaker.
    ///
    /// A missing object is a healthy answer, not a tier failure.
    pub fn counts_as_tier_failure(&self) -> bool {
        !self.is_not_found()
    }

    /// Short machine-readable error kind, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            AssetError::Configuration { .. } => "configuration",
            AssetError::StorageUnavailable { .. } => "unavailable",
            AssetError::Timeout { .. } => "timeout",
            AssetError::NotFound { .. } => "not_found",
            AssetError::CircuitOpen { .. } => "circuit_open",
            AssetError::AssetUnavailable { .. } => "asset_unavailable",
            AssetError::TierDisabled { .. } => "disabled",
            AssetError::Cache { .. } => "cache",
            AssetError::MigrationItem { .. } => "migration_item",
            AssetError::Rollback { .. } => "rollback",
            AssetError::InvalidTransition { .. } => "invalid_transition",
            AssetError::Validation { .. } => "validation",
            AssetError::Io { .. } => "io",
            AssetError::Json { .. } => "json",
            AssetError::Network { .. } => "network",
        }
    }
}
