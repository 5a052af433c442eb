//! # Circuit Breaker
//!
//! Stops calling a failing dependency for a cooldown period. Three states:
//!
//! - **Closed**: every call passes through. Failures are timestamped into a
//!   sliding window of `failure_window`; reaching `failure_threshold` failures
//!   in-window opens the circuit.
//! - **Open**: calls are rejected without invoking the operation until
//!   `open_duration` has elapsed; the next call then moves to half-open.
//! - **HalfOpen**: up to `half_open_max_attempts` probes are let through. A
//!   probe success closes the circuit and clears the failure history, a probe
//!   failure reopens it, and a call beyond the probe budget reopens it
//!   without a trial.
//!
//! State is private to the instance; breakers in different processes do not
//! share their view of the dependency.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use submission_core::ConfigError;
use submission_core::env::{self, parse_var};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failing fast - calls are rejected
    Open,
    /// Testing recovery - a limited number of probes are allowed
    HalfOpen,
}

impl CircuitState {
    pub fn name(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors surfaced by a call through the breaker.
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// The circuit rejected the call without invoking the operation.
    #[error("circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// The operation ran and failed; the failure was recorded.
    #[error("{0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::CircuitOpen { .. })
    }
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures within `failure_window` that open the circuit.
    pub failure_threshold: u32,
    /// Length of the sliding failure window.
    pub failure_window: Duration,
    /// How long the circuit stays open before probing.
    pub open_duration: Duration,
    /// Probes allowed while half-open.
    pub half_open_max_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            open_duration: Duration::from_secs(30),
            half_open_max_attempts: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Build a config from environment variables.
    ///
    /// - `SUBMISSION_BREAKER_FAILURE_THRESHOLD`
    /// - `SUBMISSION_BREAKER_FAILURE_WINDOW_MS`
    /// - `SUBMISSION_BREAKER_OPEN_DURATION_MS`
    /// - `SUBMISSION_BREAKER_HALF_OPEN_MAX_ATTEMPTS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env::process_env)
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            failure_threshold: parse_var(lookup, "SUBMISSION_BREAKER_FAILURE_THRESHOLD")?
                .unwrap_or(defaults.failure_threshold),
            failure_window: parse_var(lookup, "SUBMISSION_BREAKER_FAILURE_WINDOW_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.failure_window),
            open_duration: parse_var(lookup, "SUBMISSION_BREAKER_OPEN_DURATION_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.open_duration),
            half_open_max_attempts: parse_var(lookup, "SUBMISSION_BREAKER_HALF_OPEN_MAX_ATTEMPTS")?
                .unwrap_or(defaults.half_open_max_attempts),
        };

        if config.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "SUBMISSION_BREAKER_FAILURE_THRESHOLD",
                "0",
                "must be at least 1",
            ));
        }
        if config.half_open_max_attempts == 0 {
            return Err(ConfigError::invalid(
                "SUBMISSION_BREAKER_HALF_OPEN_MAX_ATTEMPTS",
                "0",
                "must be at least 1",
            ));
        }
        Ok(config)
    }
}

/// Counters describing breaker activity since creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub rejected_count: u64,
    pub times_opened: u64,
    /// Failures currently inside the sliding window.
    pub failures_in_window: usize,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_attempts: u32,
    metrics: CircuitBreakerMetrics,
}

/// A named circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            failure_window_ms = config.failure_window.as_millis() as u64,
            open_duration_ms = config.open_duration.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                half_open_attempts: 0,
                metrics: CircuitBreakerMetrics::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. An elapsed open period is only acted on by the next call.
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Snapshot of the counters.
    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        let mut inner = self.inner.lock().await;
        self.prune(&mut inner, Instant::now());
        let mut snapshot = inner.metrics.clone();
        snapshot.failures_in_window = inner.failures.len();
        snapshot
    }

    /// Execute an operation under breaker protection.
    ///
    /// Rejected calls surface as [`CircuitBreakerError::CircuitOpen`].
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.admit().await {
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        }
        self.run(operation).await
    }

    /// Execute an operation, answering rejected calls with `fallback`.
    ///
    /// The fallback's outcome is not recorded against the circuit.
    pub async fn call_with_fallback<F, Fut, G, GFut, T, E>(
        &self,
        operation: F,
        fallback: G,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, E>>,
    {
        if !self.admit().await {
            debug!(component = %self.name, "Circuit open, using fallback");
            return fallback().await.map_err(CircuitBreakerError::OperationFailed);
        }
        self.run(operation).await
    }

    /// Force the circuit open.
    pub async fn force_open(&self) {
        let mut inner = self.inner.lock().await;
        warn!(component = %self.name, "Circuit breaker forced open");
        self.transition_to_open(&mut inner, Instant::now());
    }

    /// Force the circuit closed, clearing failure history.
    pub async fn force_closed(&self) {
        let mut inner = self.inner.lock().await;
        warn!(component = %self.name, "Circuit breaker forced closed");
        self.transition_to_closed(&mut inner);
    }

    async fn run<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = operation().await;

        let mut inner = self.inner.lock().await;
        inner.metrics.total_calls += 1;
        match &result {
            Ok(_) => self.record_success(&mut inner),
            Err(_) => self.record_failure(&mut inner, Instant::now()),
        }
        drop(inner);

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Decide whether a call may proceed, performing time-driven transitions.
    async fn admit(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .is_none_or(|opened| now.duration_since(opened) >= self.config.open_duration);
            if !elapsed {
                inner.metrics.rejected_count += 1;
                return false;
            }
            self.transition_to_half_open(&mut inner);
        }

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if inner.half_open_attempts < self.config.half_open_max_attempts {
                    inner.half_open_attempts += 1;
                    true
                } else {
                    self.transition_to_open(&mut inner, now);
                    inner.metrics.rejected_count += 1;
                    false
                }
            }
            CircuitState::Open => {
                inner.metrics.rejected_count += 1;
                false
            }
        }
    }

    fn record_success(&self, inner: &mut Inner) {
        inner.metrics.success_count += 1;
        if inner.state == CircuitState::HalfOpen {
            self.transition_to_closed(inner);
        }
    }

    fn record_failure(&self, inner: &mut Inner, now: Instant) {
        inner.metrics.failure_count += 1;
        match inner.state {
            CircuitState::Closed => {
                inner.failures.push_back(now);
                self.prune(inner, now);
                if inner.failures.len() >= self.config.failure_threshold as usize {
                    self.transition_to_open(inner, now);
                }
            }
            CircuitState::HalfOpen => self.transition_to_open(inner, now),
            // A call admitted before another caller opened the circuit.
            CircuitState::Open => {}
        }
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        while let Some(&oldest) = inner.failures.front() {
            if now.duration_since(oldest) > self.config.failure_window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition_to_closed(&self, inner: &mut Inner) {
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
        inner.half_open_attempts = 0;
        info!(component = %self.name, "Circuit breaker closed");
    }

    fn transition_to_open(&self, inner: &mut Inner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.half_open_attempts = 0;
        inner.failures.clear();
        inner.metrics.times_opened += 1;
        warn!(
            component = %self.name,
            open_duration_ms = self.config.open_duration.as_millis() as u64,
            "Circuit breaker opened"
        );
    }

    fn transition_to_half_open(&self, inner: &mut Inner) {
        inner.state = CircuitState::HalfOpen;
        inner.half_open_attempts = 0;
        info!(component = %self.name, "Circuit breaker half-open");
    }
}
