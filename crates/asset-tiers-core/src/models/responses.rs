//! Structured result types returned to collaborators (CLI, web handlers).
//!
//! Batch and diagnostic operations never throw for per-item failures; they
//! return one of these reports with counts and an error list.

use super::{HealthStatus, Tier};
use crate::cache::CacheStats;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Asset bytes plus the metadata every tier can supply.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetPayload {
    pub key: String,
    pub bytes: Bytes,
    pub content_type: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: Option<String>,
    /// Tier that served this payload.
    pub source: Tier,
}

/// Per-tier presence of a key, computed without short-circuiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistsReport {
    pub remote: bool,
    pub cache: bool,
    pub local: bool,
}

impl ExistsReport {
    pub fn any(&self) -> bool {
        self.remote || self.cache || self.local
    }
}

/// Outcome of a write through the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutOutcome {
    pub key: String,
    pub tiers_written: Vec<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

/// Health of a single tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierHealth {
    pub tier: Tier,
    pub status: HealthStatus,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Aggregated service health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall: HealthStatus,
    /// `None` when the remote tier is disabled.
    pub remote: Option<TierHealth>,
    pub cache: TierHealth,
    /// `None` when local fallback is disabled.
    pub local: Option<TierHealth>,
    pub cache_stats: CacheStats,
    pub checked_at: DateTime<Utc>,
}

/// One failed item in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub key: String,
    pub message: String,
}

impl ItemError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Result of executing one migration phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: String,
    pub migrated: usize,
    /// Already present remotely; not uploaded again.
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<ItemError>,
    pub duration_ms: u64,
}

/// Result of a full migration run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationResult {
    pub success: bool,
    pub phases: Vec<PhaseResult>,
    pub total_migrated: usize,
    pub total_skipped: usize,
    pub total_failed: usize,
    pub errors: Vec<ItemError>,
    pub duration_ms: u64,
}

impl MigrationResult {
    /// Fold phase results into totals. Success means zero failures.
    pub fn from_phases(phases: Vec<PhaseResult>, duration_ms: u64) -> Self {
        let total_migrated = phases.iter().map(|p| p.migrated).sum();
        let total_skipped = phases.iter().map(|p| p.skipped).sum();
        let total_failed = phases.iter().map(|p| p.failed).sum();
        let errors = phases.iter().flat_map(|p| p.errors.clone()).collect();
        Self {
            success: total_failed == 0,
            phases,
            total_migrated,
            total_skipped,
            total_failed,
            errors,
            duration_ms,
        }
    }
}

/// Readiness report produced before a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_status: Option<HealthStatus>,
    pub inventory_count: usize,
}

/// Migration progress snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationProgress {
    pub total: usize,
    pub migrated: usize,
    pub failed: usize,
    pub pending: usize,
    pub progress_percent: f64,
    /// Phase index inferred from the completion percentage. An
    /// approximation; see `active_phase` for the tracked cursor. Clamped to
    /// the last phase, so 100% reports `phase_count - 1` rather than one
    /// past the end.
    pub estimated_phase: usize,
    /// Phase currently executing, when a run is in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_phase: Option<usize>,
    pub phase_count: usize,
}

/// Result of a rollback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    pub message: String,
    pub rolled_back: usize,
    /// Assets whose missing local copy was restored from the remote tier.
    pub restored_locally: usize,
    pub errors: Vec<ItemError>,
}

/// Result of verifying migrated assets against the remote listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    pub success: bool,
    pub verified: usize,
    pub missing: Vec<String>,
    pub size_mismatch: Vec<String>,
    pub errors: Vec<ItemError>,
}

/// Result of validating configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}
