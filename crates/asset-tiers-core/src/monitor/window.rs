//! Bounded rolling window of health samples.

use crate::config::TierDefaults;
use crate::models::HealthStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One observation of service health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub timestamp: DateTime<Utc>,
    pub overall: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<HealthStatus>,
    pub cache: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<HealthStatus>,
    pub response_time_ms: u64,
    pub cache_hit_rate: f64,
    /// Cache byte utilization, 0..=1.
    pub cache_utilization: f64,
}

impl HealthSample {
    /// A sample with only the overall status and latency set.
    pub fn new(overall: HealthStatus, response_time_ms: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            overall,
            remote: None,
            cache: HealthStatus::Healthy,
            local: None,
            response_time_ms,
            cache_hit_rate: 0.0,
            cache_utilization: 0.0,
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        self.overall == HealthStatus::Unhealthy
    }
}

/// FIFO of the most recent samples; the oldest is dropped when full.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<HealthSample>,
    capacity: usize,
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::with_capacity(TierDefaults::MONITOR_WINDOW_SIZE)
    }
}

impl SampleWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: HealthSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HealthSample> + ExactSizeIterator {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&HealthSample> {
        self.samples.back()
    }

    /// The newest `n` samples, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &HealthSample> {
        self.samples.iter().skip(self.samples.len().saturating_sub(n))
    }

    /// Fraction of unhealthy samples among the newest `n`.
    pub fn unhealthy_fraction(&self, n: usize) -> f64 {
        let considered = n.min(self.samples.len());
        if considered == 0 {
            return 0.0;
        }
        let unhealthy = self.recent(n).filter(|s| s.is_unhealthy()).count();
        unhealthy as f64 / considered as f64
    }

    pub fn to_vec(&self) -> Vec<HealthSample> {
        self.samples.iter().cloned().collect()
    }
}
