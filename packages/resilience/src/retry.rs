//! Exponential backoff retry.
//!
//! An operation is attempted up to `max_retries + 1` times. Between attempts
//! the executor sleeps for `min(base * 2^attempt, max)` milliseconds, widened
//! by a symmetric multiplicative jitter of `± jitter_factor`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use submission_core::ConfigError;
use submission_core::env::{self, parse_var};

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap for the exponential growth, in milliseconds.
    pub max_delay_ms: u64,
    /// Relative jitter in `[0, 1]`; `0` disables jitter.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            ..Default::default()
        }
    }

    /// Set the jitter factor.
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `SUBMISSION_RETRY_MAX_RETRIES`
    /// - `SUBMISSION_RETRY_BASE_DELAY_MS`
    /// - `SUBMISSION_RETRY_MAX_DELAY_MS`
    /// - `SUBMISSION_RETRY_JITTER_FACTOR`
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
            max_retries: parse_var(lookup, "SUBMISSION_RETRY_MAX_RETRIES")?
                .unwrap_or(defaults.max_retries),
            base_delay_ms: parse_var(lookup, "SUBMISSION_RETRY_BASE_DELAY_MS")?
                .unwrap_or(defaults.base_delay_ms),
            max_delay_ms: parse_var(lookup, "SUBMISSION_RETRY_MAX_DELAY_MS")?
                .unwrap_or(defaults.max_delay_ms),
            jitter_factor: parse_var(lookup, "SUBMISSION_RETRY_JITTER_FACTOR")?
                .unwrap_or(defaults.jitter_factor),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the backoff formula cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::invalid(
                "SUBMISSION_RETRY_JITTER_FACTOR",
                self.jitter_factor.to_string(),
                "must be within [0, 1]",
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::invalid(
                "SUBMISSION_RETRY_MAX_DELAY_MS",
                self.max_delay_ms.to_string(),
                "must not be below the base delay",
            ));
        }
        Ok(())
    }
}

/// Computes the delay in milliseconds before retrying after `attempt` (0-indexed).
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> u64 {
    calculate_delay_with(attempt, config, &mut rand::thread_rng())
}

/// [`calculate_delay`] with a caller-supplied random source.
pub fn calculate_delay_with<R: Rng + ?Sized>(attempt: u32, config: &RetryConfig, rng: &mut R) -> u64 {
    let exponential = 2u64
        .checked_pow(attempt)
        .and_then(|factor| config.base_delay_ms.checked_mul(factor))
        .unwrap_or(u64::MAX);
    let capped = exponential.min(config.max_delay_ms);

    if config.jitter_factor <= 0.0 {
        return capped;
    }

    let spread = rng.gen_range(-1.0..=1.0) * config.jitter_factor;
    let jittered = capped as f64 * (1.0 + spread);
    jittered.max(0.0).round() as u64
}

/// Result of running an operation under [`with_retry`].
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// The successful value, or the error of the last attempt.
    pub result: Result<T, E>,
    /// Number of calls made, including the initial attempt.
    pub attempts: u32,
    /// Delays slept between attempts, in milliseconds.
    pub delays: Vec<u64>,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Runs `operation` until it succeeds or `max_retries + 1` calls have failed.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, operation: F) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    with_retry_when(config, |_| true, operation).await
}

/// Like [`with_retry`], but stops at the first error `should_retry` rejects.
pub async fn with_retry_when<T, E, F, Fut, P>(
    config: &RetryConfig,
    should_retry: P,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut delays = Vec::new();
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt + 1,
                    delays,
                };
            }
            Err(error) => {
                if attempt >= config.max_retries || !should_retry(&error) {
                    if attempt >= config.max_retries {
                        tracing::debug!(
                            attempts = attempt + 1,
                            error = %error,
                            "Retries exhausted"
                        );
                    }
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt + 1,
                        delays,
                    };
                }

                let delay = calculate_delay(attempt, config);
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = delay,
                    error = %error,
                    "Attempt failed, backing off"
                );
                delays.push(delay);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
        }
    }
}
