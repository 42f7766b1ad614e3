//! LeaseManager - finalizes a task's lease on the queue service.
//!
//! Threads the task's identity and schedule-time token into each call and
//! retries transient failures with their own backoff. A stale token is never
//! retried: the lease now belongs to someone else.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::{LeasedTask, RetryConfig, WireDuration, WireError};
use crate::ports::{AcknowledgeRequest, QueueError, QueueService, RenewLeaseRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOp {
    Acknowledge,
    RenewLease,
    Delete,
}

impl fmt::Display for LeaseOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Acknowledge => "acknowledge",
            Self::RenewLease => "renew lease",
            Self::Delete => "delete",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("{op} failed after {attempts} attempts: {source}")]
    Exhausted {
        op: LeaseOp,
        attempts: u32,
        source: QueueError,
    },

    #[error("{op} rejected: {source}")]
    Rejected { op: LeaseOp, source: QueueError },

    #[error("invalid lease duration: {0}")]
    InvalidDuration(#[from] WireError),
}

impl LeaseError {
    /// The queue refused the token: another lease superseded ours.
    pub fn is_stale_lease(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                source: QueueError::StaleLease { .. },
                ..
            }
        )
    }
}

pub struct LeaseManager {
    queue: Arc<dyn QueueService>,
    retry: RetryConfig,
}

impl LeaseManager {
    pub fn new(queue: Arc<dyn QueueService>, retry: RetryConfig) -> Self {
        Self { queue, retry }
    }

    /// Remove the task after a successful push.
    pub async fn acknowledge(&self, task: &LeasedTask) -> Result<(), LeaseError> {
        let request = AcknowledgeRequest {
            name: task.name().clone(),
            schedule_time: task.schedule_time(),
        };
        self.with_retry(LeaseOp::Acknowledge, task, || {
            self.queue.acknowledge(request.clone())
        })
        .await?;
        info!(task = task.short_id(), "task acknowledged");
        Ok(())
    }

    /// Extend the lease by `duration`; returns the task with its new token.
    pub async fn renew_lease(
        &self,
        task: &LeasedTask,
        duration: Duration,
    ) -> Result<LeasedTask, LeaseError> {
        let request = RenewLeaseRequest {
            name: task.name().clone(),
            schedule_time: task.schedule_time(),
            lease_duration: WireDuration::try_from(duration)?,
        };
        let renewed = self
            .with_retry(LeaseOp::RenewLease, task, || {
                self.queue.renew_lease(request.clone())
            })
            .await?;
        info!(task = task.short_id(), retry_in = ?duration, "renewed lease");
        Ok(task.with_schedule_time(renewed.schedule_time()))
    }

    /// Delete a task that can never be pushed.
    pub async fn delete(&self, task: &LeasedTask) -> Result<(), LeaseError> {
        self.with_retry(LeaseOp::Delete, task, || self.queue.delete(task.name()))
            .await?;
        info!(task = task.short_id(), "task deleted");
        Ok(())
    }

    async fn with_retry<T, F, Fut>(
        &self,
        op: LeaseOp,
        task: &LeasedTask,
        mut call: F,
    ) -> Result<T, LeaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(source) if !source.is_transient() => {
                    warn!(task = task.short_id(), %op, error = %source, "queue rejected call");
                    return Err(LeaseError::Rejected { op, source });
                }
                Err(source) if attempt >= self.retry.attempts => {
                    warn!(task = task.short_id(), %op, attempts = attempt, error = %source, "giving up");
                    return Err(LeaseError::Exhausted {
                        op,
                        attempts: attempt,
                        source,
                    });
                }
                Err(source) => {
                    let wait = self.retry.backoff.delay_for(attempt);
                    warn!(
                        task = task.short_id(),
                        %op,
                        attempt,
                        retry_in = ?wait,
                        error = %source,
                        "queue call failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
