//! Failure-isolation primitives for calls to unreliable dependencies.
//!
//! - [`retry`] - bounded attempts with exponential backoff and jitter
//! - [`circuit_breaker`] - short-circuits calls while a dependency is unhealthy
//!
//! Both are per-instance: nothing here is shared across processes.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerMetrics, CircuitState,
};
pub use retry::{RetryConfig, RetryOutcome, calculate_delay, with_retry, with_retry_when};
