//! QueueService port - the pull queue this worker leases from.
//!
//! The real service (transport, auth, wire protocol) lives outside this crate.
//! Implementations must honour the schedule-time contract: `acknowledge` and
//! `renew_lease` carrying a token other than the one from the latest
//! lease/renew response are rejected with `QueueError::StaleLease`.

use async_trait::async_trait;

use crate::domain::{ErrorKind, LeasedTask, QueueId, ScheduleTime, TaskName, WireDuration};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue service unavailable: {0}")]
    Unavailable(String),

    #[error("lease on {name} is stale (schedule time mismatch)")]
    StaleLease { name: TaskName },

    #[error("task {name} not found")]
    NotFound { name: TaskName },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::Transient,
            Self::StaleLease { .. } | Self::NotFound { .. } | Self::InvalidArgument(_) => {
                ErrorKind::Permanent
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// How much of each task the lease response should include.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseView {
    /// Task metadata only; the payload is left out.
    Basic,
    /// Metadata and payload. The worker always leases with this view.
    #[default]
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRequest {
    pub queue: QueueId,
    pub lease_duration: WireDuration,
    pub max_tasks: u32,
    pub view: ResponseView,
}

impl LeaseRequest {
    /// Lease at most one task with its full payload.
    pub fn one(queue: QueueId, lease_duration: WireDuration) -> Self {
        Self {
            queue,
            lease_duration,
            max_tasks: 1,
            view: ResponseView::Full,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcknowledgeRequest {
    pub name: TaskName,
    pub schedule_time: ScheduleTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewLeaseRequest {
    pub name: TaskName,
    pub schedule_time: ScheduleTime,
    pub lease_duration: WireDuration,
}

#[async_trait]
pub trait QueueService: Send + Sync {
    /// Lease up to `max_tasks` tasks; this worker always asks for one.
    async fn lease(&self, request: LeaseRequest) -> Result<Option<LeasedTask>, QueueError>;

    /// Remove a completed task from the queue.
    async fn acknowledge(&self, request: AcknowledgeRequest) -> Result<(), QueueError>;

    /// Extend the lease. The returned task carries the new schedule time.
    async fn renew_lease(&self, request: RenewLeaseRequest) -> Result<LeasedTask, QueueError>;

    /// Delete a task regardless of its lease.
    async fn delete(&self, name: &TaskName) -> Result<(), QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_transient() {
        let name = TaskName::new("t");
        assert!(QueueError::Unavailable("down".into()).is_transient());
        assert!(!QueueError::StaleLease { name: name.clone() }.is_transient());
        assert!(!QueueError::NotFound { name }.is_transient());
        assert!(!QueueError::InvalidArgument("x".into()).is_transient());
    }

    #[test]
    fn lease_request_asks_for_one_full_task() {
        let request = LeaseRequest::one(
            QueueId::new("p", "l", "q"),
            WireDuration { seconds: 60, nanos: 0 },
        );
        assert_eq!(request.max_tasks, 1);
        assert_eq!(request.view, ResponseView::Full);
    }
}
