//! Periodic health sampling with trend analysis and deduplicated alerts.
//!
//! Each check samples the retrieval service's aggregated health and the
//! remote store's own health check, appends a [`HealthSample`] to the rolling
//! window, and evaluates two alert conditions:
//!
//! - **failure**: consecutive unhealthy checks reach `error_threshold`, or
//!   the unhealthy fraction of the newest 10 samples exceeds
//!   `error_rate_threshold`
//! - **latency**: the sampled response time exceeds `response_time_threshold`
//!
//! An alert fires only on the transition into a breach. While a condition
//! stays true no further alerts are sent for it.

mod alert;
mod trend;
mod window;

pub use alert::{
    sinks_from_config, Alert, AlertKind, AlertSeverity, AlertSink, CollectingAlertSink,
    ConsoleAlertSink, WebhookAlertSink,
};
pub use trend::{compute_trends, Trend, TrendReport};
pub use window::{HealthSample, SampleWindow};

use crate::config::{MonitorConfig, TierDefaults};
use crate::models::HealthStatus;
use crate::retrieval::AssetRetrievalService;
use crate::telemetry;
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Point-in-time view of the monitor.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub samples: Vec<HealthSample>,
    pub trends: TrendReport,
    pub consecutive_failures: u32,
    pub failure_breach_active: bool,
    pub latency_breach_active: bool,
    pub alerts_sent: u64,
    pub running: bool,
}

#[derive(Debug, Default)]
struct MonitorState {
    window: SampleWindow,
    consecutive_failures: u32,
    failure_breach_active: bool,
    latency_breach_active: bool,
    alerts_sent: u64,
}

struct RunningLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct MonitorInner {
    service: AssetRetrievalService,
    config: MonitorConfig,
    sinks: Vec<Arc<dyn AlertSink>>,
    state: Mutex<MonitorState>,
    running: Mutex<Option<RunningLoop>>,
}

/// Health monitor over one retrieval service.
///
/// Cloning shares the same window and loop.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl HealthMonitor {
    pub fn new(
        service: AssetRetrievalService,
        config: MonitorConfig,
        sinks: Vec<Arc<dyn AlertSink>>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                service,
                config,
                sinks,
                state: Mutex::new(MonitorState::default()),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Start the sampling loop. Returns `false` if it is already running.
    ///
    /// The first check runs immediately, then every `check_interval`.
    pub fn start(&self) -> bool {
        let mut running = self.inner.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let token = CancellationToken::new();
        let monitor = self.clone();
        let loop_token = token.clone();
        let interval = self.inner.config.check_interval;
        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Health monitor started");
            loop {
                monitor.check_now().await;
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("Health monitor stopped");
        });

        *running = Some(RunningLoop { token, handle });
        true
    }

    /// Stop the loop and wait for it to exit. Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match running {
            Some(RunningLoop { token, handle }) => {
                token.cancel();
                if let Err(e) = handle.await {
                    warn!("Health monitor task ended abnormally: {}", e);
                }
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Run one check: sample, record, and dispatch any alerts.
    pub async fn check_now(&self) -> Vec<Alert> {
        let sample = self.sample_once().await;
        self.record_sample(sample).await
    }

    /// Take one health sample without recording it.
    pub async fn sample_once(&self) -> HealthSample {
        let service = &self.inner.service;
        let started = Instant::now();
        let report = service.get_health_status().await;
        let report_elapsed = started.elapsed();

        let remote_check = match service.remote() {
            Some(remote) => Some(service.remote_health(remote).await),
            None => None,
        };

        let response_time_ms = remote_check
            .as_ref()
            .map(|p| p.latency_ms)
            .unwrap_or(report_elapsed.as_millis() as u64);
        let overall = HealthStatus::worst(
            std::iter::once(report.overall).chain(remote_check.as_ref().map(|p| p.status)),
        );
        let remote = match (report.remote.as_ref(), remote_check.as_ref()) {
            (Some(tier), Some(check)) => Some(tier.status.max(check.status)),
            (Some(tier), None) => Some(tier.status),
            (None, Some(check)) => Some(check.status),
            (None, None) => None,
        };

        HealthSample {
            timestamp: Utc::now(),
            overall,
            remote,
            cache: report.cache.status,
            local: report.local.map(|h| h.status),
            response_time_ms,
            cache_hit_rate: report.cache_stats.hit_rate,
            cache_utilization: report.cache_stats.utilization,
        }
    }

    /// Append a sample, update breach state, and dispatch resulting alerts.
    pub async fn record_sample(&self, sample: HealthSample) -> Vec<Alert> {
        let alerts = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            self.evaluate(&mut state, sample)
        };

        for alert in &alerts {
            telemetry::record_alert(alert.severity.as_str());
            for sink in &self.inner.sinks {
                if let Err(e) = sink.dispatch(alert).await {
                    warn!(sink = sink.name(), "Failed to deliver alert: {}", e);
                }
            }
        }
        alerts
    }

    fn evaluate(&self, state: &mut MonitorState, sample: HealthSample) -> Vec<Alert> {
        let config = &self.inner.config;

        match sample.overall {
            HealthStatus::Unhealthy => state.consecutive_failures += 1,
            HealthStatus::Healthy => state.consecutive_failures = 0,
            HealthStatus::Degraded => {}
        }
        let response_time_ms = sample.response_time_ms;
        let overall = sample.overall;
        state.window.push(sample);

        let rate_samples = TierDefaults::MONITOR_ERROR_RATE_SAMPLES;
        let error_rate = state.window.unhealthy_fraction(rate_samples);
        let rate_breached =
            state.window.len() >= rate_samples && error_rate > config.error_rate_threshold;
        let failing = state.consecutive_failures >= config.error_threshold || rate_breached;

        debug!(
            status = %overall,
            consecutive_failures = state.consecutive_failures,
            error_rate,
            response_time_ms,
            "Health sample recorded"
        );

        let mut alerts = Vec::new();
        if failing && !state.failure_breach_active {
            let message = if state.consecutive_failures >= config.error_threshold {
                format!(
                    "{} consecutive unhealthy health checks",
                    state.consecutive_failures
                )
            } else {
                format!(
                    "{:.0}% of the last {} health checks were unhealthy",
                    error_rate * 100.0,
                    rate_samples
                )
            };
            alerts.push(Alert {
                timestamp: Utc::now(),
                severity: AlertSeverity::Critical,
                kind: AlertKind::Failure,
                message,
                metrics: serde_json::json!({
                    "consecutive_failures": state.consecutive_failures,
                    "error_rate": error_rate,
                    "overall": overall,
                }),
            });
        } else if !failing && state.failure_breach_active {
            info!("Health failure condition cleared");
        }
        state.failure_breach_active = failing;

        let threshold_ms = config.response_time_threshold.as_millis() as u64;
        let slow = response_time_ms > threshold_ms;
        if slow && !state.latency_breach_active {
            alerts.push(Alert {
                timestamp: Utc::now(),
                severity: AlertSeverity::Warning,
                kind: AlertKind::Latency,
                message: format!(
                    "response time {}ms exceeds threshold {}ms",
                    response_time_ms, threshold_ms
                ),
                metrics: serde_json::json!({
                    "response_time_ms": response_time_ms,
                    "threshold_ms": threshold_ms,
                }),
            });
        }
        state.latency_breach_active = slow;

        state.alerts_sent += alerts.len() as u64;
        alerts
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let running = self.is_running();
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        MonitorSnapshot {
            samples: state.window.to_vec(),
            trends: compute_trends(&state.window),
            consecutive_failures: state.consecutive_failures,
            failure_breach_active: state.failure_breach_active,
            latency_breach_active: state.latency_breach_active,
            alerts_sent: state.alerts_sent,
            running,
        }
    }
}
