//! Circuit breaker guarding a storage tier.
//!
//! - CLOSED: calls flow through
//! - OPEN: calls are rejected without touching the tier
//! - HALF_OPEN: one trial call is let through to test recovery
//!
//! An open breaker is reported as a tier failure, so the retrieval service
//! falls back to the next tier immediately.

use crate::config::TierDefaults;
use crate::models::Tier;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// Time to stay open before probing.
    pub recovery_timeout: Duration,
    /// Trial calls allowed while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: TierDefaults::CIRCUIT_FAILURE_THRESHOLD,
            recovery_timeout: TierDefaults::CIRCUIT_RECOVERY_TIMEOUT,
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    total_failures: u64,
    total_successes: u64,
    opened_at: Option<Instant>,
    half_open_calls: u32,
}

/// Circuit breaker for one tier.
pub struct CircuitBreaker {
    tier: Tier,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(tier: Tier) -> Self {
        Self::with_config(tier, CircuitBreakerConfig::default())
    }

    pub fn with_config(tier: Tier, config: CircuitBreakerConfig) -> Self {
        Self {
            tier,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                total_failures: 0,
                total_successes: 0,
                opened_at: None,
                half_open_calls: 0,
            }),
        }
    }

    // A poisoned lock only means another thread panicked mid-update; the
    // counters are still usable.
    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state, moving OPEN to HALF_OPEN once the recovery timeout passed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Whether a call may go through.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                let calls = inner.half_open_calls;
                inner.half_open_calls += 1;
                calls < self.config.half_open_max_calls
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.total_successes += 1;
        inner.consecutive_failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            info!(tier = %self.tier, "Circuit breaker recovered to CLOSED");
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        inner.consecutive_failures += 1;

        let reopen = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if reopen {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.half_open_calls = 0;
            warn!(
                tier = %self.tier,
                failures = inner.consecutive_failures,
                "Circuit breaker opened"
            );
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);
        CircuitBreakerStats {
            tier: self.tier,
            state: inner.state,
            failure_count: inner.consecutive_failures,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            time_in_state: inner
                .opened_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO),
        }
    }

    /// Force the breaker back to CLOSED.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_calls = 0;
        inner.opened_at = None;
        info!(tier = %self.tier, "Circuit breaker reset to CLOSED");
    }

    fn maybe_half_open(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }
        if let Some(opened) = inner.opened_at {
            if opened.elapsed() >= self.config.recovery_timeout {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_calls = 0;
                debug!(tier = %self.tier, "Circuit breaker entering HALF_OPEN");
            }
        }
    }
}

/// Statistics about a circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub tier: Tier,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub time_in_state: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::with_config(
            Tier::Remote,
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(30),
                half_open_max_calls: 1,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_after_threshold() {
        let cb = breaker(3);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let cb = breaker(3);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_allows_single_trial_then_closes() {
        let cb = breaker(2);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow_request());
        assert!(!cb.allow_request());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(2);
        cb.record_failure();
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_and_reset() {
        let cb = breaker(2);
        cb.record_success();
        cb.record_failure();
        cb.record_failure();

        let stats = cb.stats();
        assert_eq!(stats.tier, Tier::Remote);
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.total_successes, 1);
        assert_eq!(stats.total_failures, 2);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }
}
