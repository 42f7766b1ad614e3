//! Worker configuration.
//!
//! Built once at startup (by the CLI or by tests) and shared read-only.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::backoff::BackoffConfig;
use super::errors::ConfigError;
use super::task::QueueId;

/// Retry policy for queue-service calls (lease, acknowledge, renew).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of tries, including the first one.
    pub attempts: u32,
    pub backoff: BackoffConfig,
}

impl RetryConfig {
    pub fn new(attempts: u32, backoff: BackoffConfig) -> Self {
        Self { attempts, backoff }
    }

    /// Exactly one try.
    pub fn none() -> Self {
        Self::new(1, BackoffConfig::new(Duration::ZERO, Duration::ZERO, 0))
    }
}

/// What to do with a task whose payload can never be pushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnparseablePolicy {
    /// Leave it leased; the queue redelivers it when the lease expires.
    #[default]
    Expire,

    /// Delete it from the queue.
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub project: String,
    pub location: String,
    pub queue: String,

    /// Pause between two lease calls that both found work.
    pub rate: Duration,

    /// Lease requested for each task; also the push request timeout.
    pub lease_duration: Duration,

    /// Backoff while the queue is empty.
    pub pull_backoff: BackoffConfig,

    /// Backoff applied to a task whose push failed.
    pub push_backoff: BackoffConfig,

    /// Upper bound on concurrently running dispatch units.
    pub max_in_flight: usize,

    /// Retries for the lease call before the worker gives up.
    pub lease_retry: RetryConfig,

    /// Retries for acknowledge/renew calls.
    pub finalize_retry: RetryConfig,

    pub on_unparseable: UnparseablePolicy,
}

impl WorkerConfig {
    /// Config with the stock defaults for everything but the project.
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            location: "us-central1".to_string(),
            queue: "pull-to-push".to_string(),
            rate: Duration::from_secs(1),
            lease_duration: Duration::from_secs(60),
            pull_backoff: BackoffConfig::pull_default(),
            push_backoff: BackoffConfig::push_default(),
            max_in_flight: 64,
            lease_retry: RetryConfig::new(
                5,
                BackoffConfig::new(Duration::from_secs(1), Duration::from_secs(30), 4),
            ),
            finalize_retry: RetryConfig::new(
                3,
                BackoffConfig::new(Duration::from_millis(500), Duration::from_secs(5), 2),
            ),
            on_unparseable: UnparseablePolicy::default(),
        }
    }

    pub fn queue_id(&self) -> QueueId {
        QueueId::new(&self.project, &self.location, &self.queue)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("project", &self.project),
            ("location", &self.location),
            ("queue", &self.queue),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty(field));
            }
        }
        if self.lease_duration.is_zero() {
            return Err(ConfigError::Zero("lease_duration"));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Zero("max_in_flight"));
        }
        if self.lease_retry.attempts == 0 {
            return Err(ConfigError::Zero("lease_retry.attempts"));
        }
        if self.finalize_retry.attempts == 0 {
            return Err(ConfigError::Zero("finalize_retry.attempts"));
        }
        for (class, backoff) in [
            ("pull", &self.pull_backoff),
            ("push", &self.push_backoff),
            ("lease retry", &self.lease_retry.backoff),
            ("finalize retry", &self.finalize_retry.backoff),
        ] {
            if backoff.min > backoff.max {
                return Err(ConfigError::BackoffRange {
                    class,
                    min: backoff.min,
                    max: backoff.max,
                });
            }
        }
        Ok(())
    }
}
