//! Trend classification over the sample window.
//!
//! Each metric compares the mean of the older half of the window with the
//! mean of the newer half. A relative change within 10% is `stable`.

use super::window::{HealthSample, SampleWindow};
use crate::models::HealthStatus;
use serde::{Deserialize, Serialize};

/// Relative change below which a metric counts as stable.
const STABLE_BAND: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    LowerIsBetter,
    HigherIsBetter,
}

/// Trends for every tracked metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendReport {
    pub latency: Trend,
    pub error_rate: Trend,
    pub hit_rate: Trend,
    pub memory: Trend,
}

impl Default for TrendReport {
    fn default() -> Self {
        Self {
            latency: Trend::Stable,
            error_rate: Trend::Stable,
            hit_rate: Trend::Stable,
            memory: Trend::Stable,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn classify(values: &[f64], direction: Direction) -> Trend {
    if values.len() < 2 {
        return Trend::Stable;
    }
    let (older, newer) = values.split_at(values.len() / 2);
    let before = mean(older);
    let after = mean(newer);

    let change = if before.abs() > f64::EPSILON {
        (after - before) / before.abs()
    } else if after.abs() > f64::EPSILON {
        after.signum()
    } else {
        0.0
    };
    if change.abs() <= STABLE_BAND {
        return Trend::Stable;
    }

    let rising = change > 0.0;
    match (direction, rising) {
        (Direction::LowerIsBetter, true) | (Direction::HigherIsBetter, false) => Trend::Degrading,
        _ => Trend::Improving,
    }
}

/// Classify every metric over the window.
pub fn compute_trends(window: &SampleWindow) -> TrendReport {
    let series = |f: fn(&HealthSample) -> f64| -> Vec<f64> { window.iter().map(f).collect() };

    TrendReport {
        latency: classify(&series(|s| s.response_time_ms as f64), Direction::LowerIsBetter),
        error_rate: classify(
            &series(|s| {
                if s.overall == HealthStatus::Unhealthy {
                    1.0
                } else {
                    0.0
                }
            }),
            Direction::LowerIsBetter,
        ),
        hit_rate: classify(&series(|s| s.cache_hit_rate), Direction::HigherIsBetter),
        memory: classify(&series(|s| s.cache_utilization), Direction::LowerIsBetter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(latencies: &[u64]) -> SampleWindow {
        let mut window = SampleWindow::default();
        for &latency in latencies {
            window.push(HealthSample::new(HealthStatus::Healthy, latency));
        }
        window
    }

    #[test]
    fn test_latency_trends() {
        assert_eq!(compute_trends(&window(&[100, 100, 200, 200])).latency, Trend::Degrading);
        assert_eq!(compute_trends(&window(&[200, 200, 100, 100])).latency, Trend::Improving);
        assert_eq!(compute_trends(&window(&[100, 100, 105, 104])).latency, Trend::Stable);
    }

    #[test]
    fn test_too_few_samples_is_stable() {
        assert_eq!(compute_trends(&window(&[])), TrendReport::default());
        assert_eq!(compute_trends(&window(&[500])), TrendReport::default());
    }

    #[test]
    fn test_hit_rate_higher_is_better() {
        let mut w = SampleWindow::default();
        for rate in [0.2, 0.3, 0.8, 0.9] {
            let mut sample = HealthSample::new(HealthStatus::Healthy, 10);
            sample.cache_hit_rate = rate;
            w.push(sample);
        }
        let trends = compute_trends(&w);
        assert_eq!(trends.hit_rate, Trend::Improving);
        assert_eq!(trends.memory, Trend::Stable);
    }

    #[test]
    fn test_error_rate_from_zero_baseline() {
        let mut w = SampleWindow::default();
        for status in [
            HealthStatus::Healthy,
            HealthStatus::Healthy,
            HealthStatus::Unhealthy,
            HealthStatus::Healthy,
        ] {
            w.push(HealthSample::new(status, 10));
        }
        assert_eq!(compute_trends(&w).error_rate, Trend::Degrading);
    }
}
