//! Data models shared by every tier and by the collaborator-facing API.

mod asset;
mod responses;

pub use asset::*;
pub use responses::*;

use serde::{Deserialize, Serialize};

/// One of the three asset sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Remote,
    Cache,
    Local,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Remote => "remote",
            Tier::Cache => "cache",
            Tier::Local => "local",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Health classification for a tier or for the whole service.
///
/// Variants are ordered by severity so `max` picks the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// The most severe status of a set; `Healthy` for an empty set.
    pub fn worst(statuses: impl IntoIterator<Item = HealthStatus>) -> HealthStatus {
        statuses
            .into_iter()
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_status() {
        assert_eq!(HealthStatus::worst([]), HealthStatus::Healthy);
        assert_eq!(
            HealthStatus::worst([HealthStatus::Healthy, HealthStatus::Degraded]),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::worst([
                HealthStatus::Unhealthy,
                HealthStatus::Healthy,
                HealthStatus::Degraded
            ]),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_tier_serialization() {
        assert_eq!(serde_json::to_string(&Tier::Remote).unwrap(), "\"remote\"");
        assert_eq!(Tier::Local.to_string(), "local");
    }
}
