//! Circuit breaker pattern implementation

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::failure::{FailureKind, Retryable};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests are blocked
    Open,
    /// Circuit is half-open, a single probe is allowed to test recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures inside the monitoring period that open the circuit
    pub threshold: u32,

    /// Requests inside the monitoring period required before evaluating
    pub minimum_requests: u32,

    /// Rolling window for outcome counting
    #[serde(with = "humantime_serde")]
    pub monitoring_period: Duration,

    /// Time to wait before transitioning from open to half-open
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            minimum_requests: 10,
            monitoring_period: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&bastion_config::CircuitBreakerConfig> for CircuitBreakerConfig {
    fn from(config: &bastion_config::CircuitBreakerConfig) -> Self {
        Self {
            threshold: config.threshold,
            minimum_requests: config.minimum_requests,
            monitoring_period: config.monitoring_period,
            reset_timeout: config.reset_timeout,
        }
    }
}

/// Snapshot of circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    /// Failures inside the monitoring period
    pub failure_count: u32,
    /// Successes inside the monitoring period
    pub success_count: u32,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Calls rejected without dispatch
    pub total_rejected: u64,
    /// Earliest time a probe will be let through while open
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, with = "humantime_serde")]
    pub retry_after: Option<Duration>,
    pub last_state_change: Option<DateTime<Utc>>,
}

/// Errors surfaced by [`CircuitBreaker::execute`]
#[derive(Debug, Clone, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Rejected before dispatch
    #[error("Circuit breaker is open")]
    Open { retry_after: Option<Duration> },

    /// The guarded operation failed
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// Check if this is a rejection by an open circuit
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }

    /// Get the operation's error if it ran
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Open { .. } => None,
            CircuitBreakerError::Inner(error) => Some(error),
        }
    }
}

/// Thread-safe circuit breaker implementation
#[derive(Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
}

#[derive(Default)]
struct Totals {
    requests: u64,
    successes: u64,
    failures: u64,
    rejected: u64,
}

struct CircuitBreakerState {
    state: CircuitState,
    totals: Totals,
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    last_state_change: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    forced_open: bool,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            totals: Totals::default(),
            window: VecDeque::new(),
            opened_at: None,
            last_state_change: None,
            probe_in_flight: false,
            forced_open: false,
        }
    }
}

/// Admission ticket for one guarded call
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
}

impl Permit<'_> {
    fn complete(self, success: bool) {
        self.breaker.record(success, self.probe);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.probe {
            self.breaker.state.lock().probe_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Configuration in effect
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `f` if the circuit admits it, recording the outcome.
    ///
    /// Auth and client failures count as successes since the downstream
    /// answered. Rejections are not recorded as failures.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        let permit = self.try_acquire().map_err(|retry_after| CircuitBreakerError::Open {
            retry_after,
        })?;

        match f().await {
            Ok(value) => {
                permit.complete(true);
                Ok(value)
            }
            Err(error) => {
                permit.complete(!error.failure_kind().counts_as_downstream_failure());
                Err(CircuitBreakerError::Inner(error))
            }
        }
    }

    /// Check if the circuit breaker is open (requests should be blocked)
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Get the current state
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.update_state(&mut state);
        state.state
    }

    /// Record a successful operation.
    ///
    /// Outcomes recorded by hand are treated like a probe while half-open.
    pub fn record_success(&self) {
        self.record(true, true);
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        self.record(false, true);
    }

    /// Record a failure classified by kind
    pub fn record_kind(&self, kind: FailureKind) {
        self.record(!kind.counts_as_downstream_failure(), true);
    }

    /// Get current statistics
    pub fn stats(&self) -> CircuitStats {
        let mut state = self.state.lock();
        self.update_state(&mut state);
        self.clean_window(&mut state);

        let failure_count = state.window.iter().filter(|(_, ok)| !ok).count() as u32;
        let success_count = state.window.len() as u32 - failure_count;
        let retry_after = self.retry_after(&state);

        CircuitStats {
            state: state.state,
            failure_count,
            success_count,
            total_requests: state.totals.requests,
            total_successes: state.totals.successes,
            total_failures: state.totals.failures,
            total_rejected: state.totals.rejected,
            next_attempt_at: retry_after
                .and_then(|wait| chrono::Duration::from_std(wait).ok())
                .map(|wait| Utc::now() + wait),
            retry_after,
            last_state_change: state.last_state_change,
        }
    }

    /// Reset the circuit breaker to closed state with cleared counters
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = CircuitBreakerState::new();
        state.last_state_change = Some(Utc::now());
        log::info!("Circuit breaker reset");
    }

    /// Open the circuit until `force_close` or `reset` is called
    pub fn force_open(&self) {
        let mut state = self.state.lock();
        state.forced_open = true;
        state.probe_in_flight = false;
        self.transition_to_open(&mut state);
    }

    /// Close the circuit and clear the rolling window
    pub fn force_close(&self) {
        let mut state = self.state.lock();
        state.forced_open = false;
        self.transition_to_closed(&mut state);
    }

    // Internal methods

    fn try_acquire(&self) -> Result<Permit<'_>, Option<Duration>> {
        let mut state = self.state.lock();
        self.update_state(&mut state);

        match state.state {
            CircuitState::Closed => Ok(Permit {
                breaker: self,
                probe: false,
            }),
            CircuitState::HalfOpen if !state.probe_in_flight => {
                state.probe_in_flight = true;
                log::debug!("Circuit breaker admitting half-open probe");
                Ok(Permit {
                    breaker: self,
                    probe: true,
                })
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                state.totals.rejected += 1;
                Err(self.retry_after(&state))
            }
        }
    }

    /// Only a probe decides the half-open state. Other outcomes arriving
    /// while open or half-open belong to calls admitted before the circuit
    /// opened and only count towards the totals.
    fn record(&self, success: bool, probe: bool) {
        let mut state = self.state.lock();
        self.update_state(&mut state);

        state.totals.requests += 1;
        if success {
            state.totals.successes += 1;
        } else {
            state.totals.failures += 1;
        }

        match state.state {
            CircuitState::Closed => {
                state.window.push_back((Instant::now(), success));
                self.clean_window(&mut state);
                if self.should_open(&state) {
                    self.transition_to_open(&mut state);
                }
            }
            CircuitState::HalfOpen if probe => {
                if success {
                    self.transition_to_closed(&mut state);
                } else {
                    self.transition_to_open(&mut state);
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                log::debug!(
                    "Circuit breaker ignoring late {} while {}",
                    if success { "success" } else { "failure" },
                    state.state
                );
            }
        }
    }

    fn update_state(&self, state: &mut CircuitBreakerState) {
        if state.state == CircuitState::Open && !state.forced_open {
            let elapsed = state
                .opened_at
                .map(|opened| opened.elapsed() >= self.config.reset_timeout)
                .unwrap_or(true);
            if elapsed {
                self.transition_to_half_open(state);
            }
        }
    }

    fn retry_after(&self, state: &CircuitBreakerState) -> Option<Duration> {
        if state.state != CircuitState::Open || state.forced_open {
            return None;
        }
        let opened = state.opened_at?;
        Some(self.config.reset_timeout.saturating_sub(opened.elapsed()))
    }

    fn should_open(&self, state: &CircuitBreakerState) -> bool {
        let window_failures = state.window.iter().filter(|(_, success)| !success).count() as u32;
        let window_total = state.window.len() as u32;

        window_total >= self.config.minimum_requests && window_failures >= self.config.threshold
    }

    fn clean_window(&self, state: &mut CircuitBreakerState) {
        let Some(cutoff) = Instant::now().checked_sub(self.config.monitoring_period) else {
            return;
        };
        while let Some((timestamp, _)) = state.window.front() {
            if *timestamp > cutoff {
                break;
            }
            state.window.pop_front();
        }
    }

    fn transition_to_open(&self, state: &mut CircuitBreakerState) {
        state.state = CircuitState::Open;
        state.opened_at = Some(Instant::now());
        state.last_state_change = Some(Utc::now());
        log::warn!(
            "Circuit breaker opened ({} failures in window of {})",
            state.window.iter().filter(|(_, ok)| !ok).count(),
            state.window.len()
        );
    }

    fn transition_to_closed(&self, state: &mut CircuitBreakerState) {
        state.state = CircuitState::Closed;
        state.window.clear();
        state.probe_in_flight = false;
        state.last_state_change = Some(Utc::now());
        log::info!("Circuit breaker closed");
    }

    fn transition_to_half_open(&self, state: &mut CircuitBreakerState) {
        state.state = CircuitState::HalfOpen;
        state.probe_in_flight = false;
        state.last_state_change = Some(Utc::now());
        log::info!("Circuit breaker transitioned to half-open state");
    }
}

/// Builder for circuit breaker configuration
pub struct CircuitBreakerBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
        }
    }

    /// Set failure threshold
    pub fn threshold(mut self, threshold: u32) -> Self {
        self.config.threshold = threshold;
        self
    }

    /// Set minimum requests before evaluation
    pub fn minimum_requests(mut self, min: u32) -> Self {
        self.config.minimum_requests = min;
        self
    }

    /// Set rolling window for outcome counting
    pub fn monitoring_period(mut self, period: Duration) -> Self {
        self.config.monitoring_period = period;
        self
    }

    /// Set time spent open before a probe is admitted
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    /// Build the circuit breaker
    pub fn build(self) -> CircuitBreaker {
        CircuitBreaker::new(self.config)
    }
}

impl Default for CircuitBreakerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
