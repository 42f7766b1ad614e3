//! InMemoryQueueService - a pull queue held in process memory.
//!
//! Used by tests and by the CLI's local mode. It follows the same lease
//! contract as the hosted service:
//! - a leased task is invisible until its lease expires
//! - every lease/renew issues a fresh schedule-time token
//! - acknowledge/renew with any other token fails with `StaleLease`
//! - `attempt_dispatch_count` counts prior deliveries
//!
//! Lease expiry runs on `tokio::time`, so paused-clock tests behave.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use ulid::Ulid;

use crate::domain::{LeasedTask, QueueId, ScheduleTime, TaskName, WireDuration, WireTimestamp};
use crate::ports::{
    AcknowledgeRequest, LeaseRequest, QueueError, QueueService, RenewLeaseRequest, ResponseView,
};

/// Queue operations, for fault injection and the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOp {
    Lease,
    Acknowledge,
    RenewLease,
    Delete,
}

/// A call as seen by the queue, recorded in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCall {
    Lease {
        max_tasks: u32,
        lease_duration: WireDuration,
    },
    Acknowledge {
        name: TaskName,
        schedule_time: ScheduleTime,
    },
    RenewLease {
        name: TaskName,
        schedule_time: ScheduleTime,
        lease_duration: Duration,
    },
    Delete {
        name: TaskName,
    },
}

#[derive(Debug, Clone)]
struct TaskRecord {
    name: TaskName,
    create_time: DateTime<Utc>,
    payload: Vec<u8>,
    dispatch_count: u32,
    /// Token of the current lease, if the task was ever leased.
    schedule_time: Option<ScheduleTime>,
    /// Invisible to `lease` until this instant.
    visible_at: Instant,
}

impl TaskRecord {
    fn snapshot(&self, schedule_time: ScheduleTime, dispatch_count: u32) -> LeasedTask {
        LeasedTask::new(
            self.name.clone(),
            self.create_time,
            schedule_time,
            dispatch_count,
            self.payload.clone(),
        )
    }

    fn check_token(&self, presented: ScheduleTime) -> Result<(), QueueError> {
        if self.schedule_time == Some(presented) {
            Ok(())
        } else {
            Err(QueueError::StaleLease {
                name: self.name.clone(),
            })
        }
    }
}

struct InMemoryQueueState {
    records: HashMap<TaskName, TaskRecord>,

    /// Insertion order; leasing scans it for the first visible task.
    order: VecDeque<TaskName>,

    /// Last issued token, so tokens are strictly increasing.
    last_token: WireTimestamp,

    faults: HashMap<QueueOp, u32>,

    calls: Vec<QueueCall>,
}

impl InMemoryQueueState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            order: VecDeque::new(),
            last_token: WireTimestamp { seconds: 0, nanos: 0 },
            faults: HashMap::new(),
            calls: Vec::new(),
        }
    }

    fn take_fault(&mut self, op: QueueOp) -> Result<(), QueueError> {
        match self.faults.get_mut(&op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(QueueError::Unavailable(format!("injected {op:?} failure")))
            }
            _ => Ok(()),
        }
    }

    /// Token for a lease that ends `lease` from now.
    fn issue_token(&mut self, lease: Duration) -> ScheduleTime {
        let now = Utc::now();
        let expires = chrono::Duration::from_std(lease)
            .ok()
            .and_then(|lease| now.checked_add_signed(lease))
            .unwrap_or(now);
        let mut token = WireTimestamp::from(expires);
        if token <= self.last_token {
            token = next_after(self.last_token);
        }
        self.last_token = token;
        ScheduleTime::new(token)
    }
}

fn next_after(t: WireTimestamp) -> WireTimestamp {
    if t.nanos >= 999_999_999 {
        WireTimestamp {
            seconds: t.seconds + 1,
            nanos: 0,
        }
    } else {
        WireTimestamp {
            seconds: t.seconds,
            nanos: t.nanos + 1,
        }
    }
}

/// In-memory queue implementation.
#[derive(Clone)]
pub struct InMemoryQueueService {
    queue: QueueId,
    state: Arc<Mutex<InMemoryQueueState>>,
}

impl InMemoryQueueService {
    pub fn new(queue: QueueId) -> Self {
        Self {
            queue,
            state: Arc::new(Mutex::new(InMemoryQueueState::new())),
        }
    }

    pub fn queue_id(&self) -> &QueueId {
        &self.queue
    }

    /// Add a task and return its generated name.
    pub async fn push(&self, payload: Vec<u8>) -> TaskName {
        let name = TaskName::new(format!("{}/tasks/{}", self.queue, Ulid::new()));
        self.push_named(name.clone(), payload, 0).await;
        name
    }

    /// Add a task with a fixed name and prior dispatch count.
    pub async fn push_named(&self, name: TaskName, payload: Vec<u8>, dispatch_count: u32) {
        let mut state = self.state.lock().await;
        let record = TaskRecord {
            name: name.clone(),
            create_time: Utc::now(),
            payload,
            dispatch_count,
            schedule_time: None,
            visible_at: Instant::now(),
        };
        if state.records.insert(name.clone(), record).is_none() {
            state.order.push_back(name);
        }
    }

    /// Make the next `times` calls of `op` fail with `Unavailable`.
    pub async fn fail_next(&self, op: QueueOp, times: u32) {
        let mut state = self.state.lock().await;
        *state.faults.entry(op).or_insert(0) += times;
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, name: &TaskName) -> bool {
        self.state.lock().await.records.contains_key(name)
    }

    /// All calls received so far, oldest first.
    pub async fn calls(&self) -> Vec<QueueCall> {
        self.state.lock().await.calls.clone()
    }
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn lease(&self, request: LeaseRequest) -> Result<Option<LeasedTask>, QueueError> {
        let mut state = self.state.lock().await;
        state.calls.push(QueueCall::Lease {
            max_tasks: request.max_tasks,
            lease_duration: request.lease_duration,
        });
        state.take_fault(QueueOp::Lease)?;

        if request.queue != self.queue {
            return Err(QueueError::InvalidArgument(format!(
                "unknown queue {}",
                request.queue
            )));
        }
        if request.max_tasks == 0 {
            return Err(QueueError::InvalidArgument("max_tasks must be >= 1".into()));
        }
        let lease = Duration::try_from(request.lease_duration)
            .map_err(|e| QueueError::InvalidArgument(e.to_string()))?;

        let now = Instant::now();
        let Some(name) = state
            .order
            .iter()
            .find(|name| {
                state
                    .records
                    .get(*name)
                    .is_some_and(|record| record.visible_at <= now)
            })
            .cloned()
        else {
            return Ok(None);
        };

        let token = state.issue_token(lease);
        let Some(record) = state.records.get_mut(&name) else {
            return Ok(None);
        };
        let prior = record.dispatch_count;
        record.dispatch_count += 1;
        record.schedule_time = Some(token);
        record.visible_at = now + lease;
        let mut task = record.snapshot(token, prior);
        if request.view == ResponseView::Basic {
            task = task.without_payload();
        }
        Ok(Some(task))
    }

    async fn acknowledge(&self, request: AcknowledgeRequest) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.calls.push(QueueCall::Acknowledge {
            name: request.name.clone(),
            schedule_time: request.schedule_time,
        });
        state.take_fault(QueueOp::Acknowledge)?;

        let record = state
            .records
            .get(&request.name)
            .ok_or_else(|| QueueError::NotFound {
                name: request.name.clone(),
            })?;
        record.check_token(request.schedule_time)?;

        state.records.remove(&request.name);
        state.order.retain(|name| name != &request.name);
        Ok(())
    }

    async fn renew_lease(&self, request: RenewLeaseRequest) -> Result<LeasedTask, QueueError> {
        let lease = Duration::try_from(request.lease_duration)
            .map_err(|e| QueueError::InvalidArgument(e.to_string()))?;

        let mut state = self.state.lock().await;
        state.calls.push(QueueCall::RenewLease {
            name: request.name.clone(),
            schedule_time: request.schedule_time,
            lease_duration: lease,
        });
        state.take_fault(QueueOp::RenewLease)?;

        state
            .records
            .get(&request.name)
            .ok_or_else(|| QueueError::NotFound {
                name: request.name.clone(),
            })?
            .check_token(request.schedule_time)?;

        let token = state.issue_token(lease);
        let Some(record) = state.records.get_mut(&request.name) else {
            return Err(QueueError::NotFound { name: request.name });
        };
        record.schedule_time = Some(token);
        record.visible_at = Instant::now() + lease;
        // count reported on renewal is the one of the current delivery
        let current = record.dispatch_count.saturating_sub(1);
        Ok(record.snapshot(token, current))
    }

    async fn delete(&self, name: &TaskName) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.calls.push(QueueCall::Delete { name: name.clone() });
        state.take_fault(QueueOp::Delete)?;

        if state.records.remove(name).is_none() {
            return Err(QueueError::NotFound { name: name.clone() });
        }
        state.order.retain(|n| n != name);
        Ok(())
    }
}
