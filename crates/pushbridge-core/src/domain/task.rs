use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wire::WireTimestamp;

/// Fully-qualified queue path: `projects/{project}/locations/{location}/queues/{queue}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueId(String);

impl QueueId {
    pub fn new(project: &str, location: &str, queue: &str) -> Self {
        Self(format!(
            "projects/{project}/locations/{location}/queues/{queue}"
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Task resource name as issued by the queue service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskName(String);

impl TaskName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trailing path segment, used to correlate log lines.
    pub fn short_id(&self) -> &str {
        match self.0.rfind('/') {
            Some(i) => &self.0[i + 1..],
            None => &self.0,
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Optimistic-concurrency token of a lease.
///
/// Must be echoed back unchanged on acknowledge/renew; the queue service
/// rejects calls carrying a stale token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleTime(WireTimestamp);

impl ScheduleTime {
    pub fn new(wire: WireTimestamp) -> Self {
        Self(wire)
    }

    pub fn as_wire(&self) -> WireTimestamp {
        self.0
    }
}

/// Lease-scoped view of a task held by this worker.
///
/// Immutable: a renewal yields a new `LeasedTask` with a fresh
/// `schedule_time`, so later calls always carry the latest token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedTask {
    name: TaskName,
    create_time: DateTime<Utc>,
    schedule_time: ScheduleTime,
    attempt_dispatch_count: u32,
    payload: Vec<u8>,
}

impl LeasedTask {
    pub fn new(
        name: TaskName,
        create_time: DateTime<Utc>,
        schedule_time: ScheduleTime,
        attempt_dispatch_count: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            name,
            create_time,
            schedule_time,
            attempt_dispatch_count,
            payload,
        }
    }

    pub fn name(&self) -> &TaskName {
        &self.name
    }

    pub fn short_id(&self) -> &str {
        self.name.short_id()
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn schedule_time(&self) -> ScheduleTime {
        self.schedule_time
    }

    /// Number of prior deliveries, as tracked by the queue service.
    pub fn attempt_dispatch_count(&self) -> u32 {
        self.attempt_dispatch_count
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Same task without its payload, as returned by a basic-view lease.
    pub fn without_payload(self) -> Self {
        Self {
            payload: Vec::new(),
            ..self
        }
    }

    /// Same task, carrying the token from a renewal response.
    pub fn with_schedule_time(&self, schedule_time: ScheduleTime) -> Self {
        Self {
            schedule_time,
            ..self.clone()
        }
    }
}
