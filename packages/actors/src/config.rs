//! Engine tunables.

use std::time::Duration;

use resilience::{CircuitBreakerConfig, RetryConfig};
use submission_core::ConfigError;
use submission_core::env::{self, parse_var, string_var};

/// Worklist and lease settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Lease length for item and user locks.
    pub lock_ttl: Duration,
    /// Entries inspected from the head on each dequeue.
    pub scan_window: usize,
    /// Prefix of every store key the queue uses.
    pub key_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(300),
            scan_window: 10,
            key_prefix: "submission".to_string(),
        }
    }
}

impl QueueConfig {
    /// - `SUBMISSION_LOCK_TTL_SECS`
    /// - `SUBMISSION_SCAN_WINDOW`
    /// - `SUBMISSION_QUEUE_KEY_PREFIX`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env::process_env)
    }

    pub fn from_lookup<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let lock_ttl_secs: u64 = parse_var(lookup, "SUBMISSION_LOCK_TTL_SECS")?
            .unwrap_or(defaults.lock_ttl.as_secs());
        if lock_ttl_secs == 0 {
            return Err(ConfigError::invalid(
                "SUBMISSION_LOCK_TTL_SECS",
                "0",
                "must be at least 1",
            ));
        }

        let scan_window = parse_var(lookup, "SUBMISSION_SCAN_WINDOW")?.unwrap_or(defaults.scan_window);
        if scan_window == 0 {
            return Err(ConfigError::invalid(
                "SUBMISSION_SCAN_WINDOW",
                "0",
                "must be at least 1",
            ));
        }

        Ok(Self {
            lock_ttl: Duration::from_secs(lock_ttl_secs),
            scan_window,
            key_prefix: string_var(lookup, "SUBMISSION_QUEUE_KEY_PREFIX")
                .unwrap_or(defaults.key_prefix),
        })
    }
}

/// Worker loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Delay between polling cycles.
    pub poll_interval: Duration,
    /// Processing attempts before an application is FAILED.
    pub max_retries: u32,
    /// Workers started by the supervisor.
    pub worker_count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5_000),
            max_retries: 3,
            worker_count: 1,
        }
    }
}

impl WorkerConfig {
    /// - `SUBMISSION_POLL_INTERVAL_MS`
    /// - `SUBMISSION_MAX_RETRIES`
    /// - `SUBMISSION_WORKER_COUNT`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env::process_env)
    }

    pub fn from_lookup<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            poll_interval: parse_var(lookup, "SUBMISSION_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            max_retries: parse_var(lookup, "SUBMISSION_MAX_RETRIES")?
                .unwrap_or(defaults.max_retries),
            worker_count: parse_var(lookup, "SUBMISSION_WORKER_COUNT")?
                .unwrap_or(defaults.worker_count),
        })
    }
}

/// Everything the supervisor needs to run workers.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env::process_env)
    }

    pub fn from_lookup<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            queue: QueueConfig::from_lookup(lookup)?,
            worker: WorkerConfig::from_lookup(lookup)?,
            retry: RetryConfig::from_lookup(lookup)?,
            breaker: CircuitBreakerConfig::from_lookup(lookup)?,
        })
    }
}
