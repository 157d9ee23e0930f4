//! Migration plans: the fixed, ordered list of phases.

use crate::config::TierDefaults;
use crate::error::Result;
use crate::models::{Asset, AssetFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How urgently a phase should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Expected blast radius if a phase goes wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// A named batch of assets migrated together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPhase {
    pub name: String,
    pub description: String,
    /// Remote keys of the phase's assets, in execution order.
    pub asset_keys: Vec<String>,
    pub priority: Priority,
    pub risk_level: RiskLevel,
    pub estimated_duration_minutes: u64,
}

impl MigrationPhase {
    fn new(
        name: &str,
        description: &str,
        asset_keys: Vec<String>,
        priority: Priority,
        risk_level: RiskLevel,
    ) -> Self {
        let seconds = asset_keys.len() as u64 * TierDefaults::MIGRATION_SECONDS_PER_ASSET;
        Self {
            name: name.to_string(),
            description: description.to_string(),
            estimated_duration_minutes: seconds.div_ceil(60).max(1),
            asset_keys,
            priority,
            risk_level,
        }
    }

    pub fn len(&self) -> usize {
        self.asset_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.asset_keys.is_empty()
    }
}

/// An immutable, ordered list of phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    phases: Vec<MigrationPhase>,
    created_at: DateTime<Utc>,
}

impl MigrationPlan {
    /// Split an inventory into phases.
    ///
    /// - `pilot`: the `pilot_size` smallest assets
    /// - `core`: remaining PNG and WebP assets
    /// - `bulk`: everything else
    ///
    /// Empty phases are dropped. Within a phase assets are ordered by size,
    /// then key.
    pub fn build(assets: &[Asset], pilot_size: usize) -> Result<Self> {
        let mut keyed = Vec::with_capacity(assets.len());
        for asset in assets {
            keyed.push((asset.target_remote_key()?, asset.size, asset.format));
        }
        keyed.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        keyed.dedup_by(|a, b| a.0 == b.0);

        let rest = keyed.split_off(pilot_size.min(keyed.len()));
        let pilot: Vec<String> = keyed.into_iter().map(|(key, _, _)| key).collect();
        let (core, bulk): (Vec<_>, Vec<_>) = rest
            .into_iter()
            .partition(|(_, _, format)| matches!(format, AssetFormat::Png | AssetFormat::Webp));

        let phases = [
            MigrationPhase::new(
                "pilot",
                "Smallest assets first, to validate the pipeline end to end",
                pilot,
                Priority::High,
                RiskLevel::Low,
            ),
            MigrationPhase::new(
                "core",
                "Lossless and WebP assets",
                core.into_iter().map(|(key, _, _)| key).collect(),
                Priority::Medium,
                RiskLevel::Medium,
            ),
            MigrationPhase::new(
                "bulk",
                "Remaining assets",
                bulk.into_iter().map(|(key, _, _)| key).collect(),
                Priority::Low,
                RiskLevel::High,
            ),
        ]
        .into_iter()
        .filter(|phase| !phase.is_empty())
        .collect();

        Ok(Self {
            phases,
            created_at: Utc::now(),
        })
    }

    pub fn phases(&self) -> &[MigrationPhase] {
        &self.phases
    }

    pub fn phase(&self, index: usize) -> Option<&MigrationPhase> {
        self.phases.get(index)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn total_assets(&self) -> usize {
        self.phases.iter().map(MigrationPhase::len).sum()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
