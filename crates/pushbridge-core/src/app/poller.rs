//! Poller - the lease loop.
//!
//! # Flow (per iteration)
//! 1. wait for a free dispatch slot (bounded by `max_in_flight`)
//! 2. `QueueService::lease` one task
//! 3. empty: sleep `pull_backoff.delay_for(consecutive empty polls)`
//! 4. leased: spawn a dispatch unit, then sleep `rate`
//!
//! A dispatch unit runs `TaskPipeline::process` (push, then ack / renew /
//! drop / delete) and hands its result back through a `JoinSet`. The loop
//! reaps those results, logs failures and keeps going; only the lease call
//! itself can stop the loop with an error.
//!
//! Shutdown: raising the watch signal (or dropping its sender) stops leasing,
//! lets in-flight units finish, and returns the run's `WorkerStats`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::app::dispatcher::Dispatcher;
use crate::app::lease_manager::{LeaseError, LeaseManager};
use crate::domain::{
    BackoffConfig, ConfigError, DispatchOutcome, LeasedTask, TaskDisposition, UnparseablePolicy,
    WireDuration, WireError, WorkerConfig,
};
use crate::observability::WorkerStats;
use crate::ports::{LeaseRequest, QueueError, QueueService};

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("lease duration cannot be sent to the queue: {0}")]
    LeaseDuration(#[from] WireError),

    #[error("leasing from the queue failed: {0}")]
    Lease(#[source] QueueError),

    #[error("http client could not be built: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Everything that happens to one task after it was leased.
pub struct TaskPipeline {
    dispatcher: Dispatcher,
    leases: LeaseManager,
    push_backoff: BackoffConfig,
    on_unparseable: UnparseablePolicy,
}

impl TaskPipeline {
    pub fn new(
        dispatcher: Dispatcher,
        leases: LeaseManager,
        push_backoff: BackoffConfig,
        on_unparseable: UnparseablePolicy,
    ) -> Self {
        Self {
            dispatcher,
            leases,
            push_backoff,
            on_unparseable,
        }
    }

    pub async fn process(&self, task: &LeasedTask) -> Result<TaskDisposition, LeaseError> {
        match self.dispatcher.handle(task).await {
            DispatchOutcome::Success { .. } => {
                self.leases.acknowledge(task).await?;
                Ok(TaskDisposition::Acknowledged)
            }
            DispatchOutcome::HttpFailure { .. } => {
                // the current attempt already happened; wait for the next one
                let next_attempt = task.attempt_dispatch_count().saturating_add(1);
                let retry_in = self.push_backoff.delay_for(next_attempt);
                let renewed = self.leases.renew_lease(task, retry_in).await?;
                Ok(TaskDisposition::Renewed {
                    retry_in,
                    schedule_time: renewed.schedule_time(),
                })
            }
            DispatchOutcome::FatalDecode { reason }
            | DispatchOutcome::FatalRequestBuild { reason } => match self.on_unparseable {
                UnparseablePolicy::Expire => Ok(TaskDisposition::Dropped { reason }),
                UnparseablePolicy::Delete => {
                    self.leases.delete(task).await?;
                    Ok(TaskDisposition::Deleted { reason })
                }
            },
        }
    }
}

type UnitResult = (String, Result<TaskDisposition, LeaseError>);

/// Result of one lease round.
enum LeaseRound {
    Task(LeasedTask),
    Empty,
    /// Shutdown arrived while waiting to retry.
    Stopped,
}

pub struct Poller {
    config: Arc<WorkerConfig>,
    queue: Arc<dyn QueueService>,
    pipeline: Arc<TaskPipeline>,
}

impl Poller {
    /// Validates `config` and wires the lease manager to `queue`.
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn QueueService>,
        dispatcher: Dispatcher,
    ) -> Result<Self, PollerError> {
        config.validate()?;
        let leases = LeaseManager::new(Arc::clone(&queue), config.finalize_retry);
        let pipeline = TaskPipeline::new(
            dispatcher,
            leases,
            config.push_backoff,
            config.on_unparseable,
        );
        Ok(Self {
            config: Arc::new(config),
            queue,
            pipeline: Arc::new(pipeline),
        })
    }

    /// Poller with the reqwest dispatcher (request timeout = lease duration).
    pub fn with_http(
        config: WorkerConfig,
        queue: Arc<dyn QueueService>,
    ) -> Result<Self, PollerError> {
        let dispatcher = Dispatcher::with_lease_timeout(config.lease_duration)?;
        Self::new(config, queue, dispatcher)
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<WorkerStats, PollerError> {
        let queue_id = self.config.queue_id();
        let request = LeaseRequest::one(
            queue_id.clone(),
            WireDuration::try_from(self.config.lease_duration)?,
        );
        let slots = Arc::new(Semaphore::new(self.config.max_in_flight));
        let mut in_flight: JoinSet<UnitResult> = JoinSet::new();
        let mut stats = WorkerStats::default();
        // number of polls in a row that found no task
        let mut empty_polls: u32 = 0;

        info!(queue = %queue_id, "polling queue");

        let result = loop {
            while let Some(done) = in_flight.try_join_next() {
                record(&mut stats, done);
            }
            if stop_requested(&shutdown) {
                break Ok(());
            }

            let permit = tokio::select! {
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Ok(()),
                },
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    record(&mut stats, done);
                    continue;
                }
                _ = shutdown.changed() => continue,
            };

            let round = match self.lease_with_retry(&request, &mut shutdown).await {
                Ok(round) => round,
                Err(e) => break Err(e),
            };

            match round {
                LeaseRound::Stopped => break Ok(()),
                LeaseRound::Task(task) => {
                    empty_polls = 0;
                    stats.leased += 1;
                    info!(
                        task = task.short_id(),
                        created = %task.create_time().to_rfc3339(),
                        attempt = task.attempt_dispatch_count(),
                        "handling task"
                    );

                    let pipeline = Arc::clone(&self.pipeline);
                    in_flight.spawn(async move {
                        let _permit = permit;
                        let result = pipeline.process(&task).await;
                        (task.short_id().to_string(), result)
                    });

                    if sleep_or_shutdown(self.config.rate, &mut shutdown).await {
                        break Ok(());
                    }
                }
                LeaseRound::Empty => {
                    drop(permit);
                    empty_polls = empty_polls.saturating_add(1);
                    stats.empty_polls += 1;
                    let wait = self.config.pull_backoff.delay_for(empty_polls);
                    info!(wait = ?wait, "no tasks, waiting");
                    if sleep_or_shutdown(wait, &mut shutdown).await {
                        break Ok(());
                    }
                }
            }
        };

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "waiting for in-flight tasks");
        }
        while let Some(done) = in_flight.join_next().await {
            record(&mut stats, done);
        }

        match result {
            Ok(()) => {
                info!(?stats, "poller stopped");
                Ok(stats)
            }
            Err(e) => {
                error!(error = %e, ?stats, "poller failed");
                Err(e)
            }
        }
    }

    /// Lease one task, retrying transient failures.
    async fn lease_with_retry(
        &self,
        request: &LeaseRequest,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<LeaseRound, PollerError> {
        let policy = self.config.lease_retry;
        let mut attempt = 1;
        loop {
            match self.queue.lease(request.clone()).await {
                Ok(Some(task)) => return Ok(LeaseRound::Task(task)),
                Ok(None) => return Ok(LeaseRound::Empty),
                Err(e) if e.is_transient() && attempt < policy.attempts => {
                    let wait = policy.backoff.delay_for(attempt);
                    warn!(attempt, retry_in = ?wait, error = %e, "lease failed, retrying");
                    if sleep_or_shutdown(wait, shutdown).await {
                        return Ok(LeaseRound::Stopped);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(PollerError::Lease(e)),
            }
        }
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Sleep for `duration`; returns true if shutdown was requested meanwhile.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    // a signal seen by an earlier `changed()` is not reported again
    if stop_requested(shutdown) {
        return true;
    }
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return stop_requested(shutdown),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}

fn record(stats: &mut WorkerStats, done: Result<UnitResult, JoinError>) {
    match done {
        Ok((task, Ok(disposition))) => {
            match &disposition {
                TaskDisposition::Acknowledged => stats.acknowledged += 1,
                TaskDisposition::Renewed { .. } => stats.renewed += 1,
                TaskDisposition::Dropped { reason } => {
                    warn!(task = %task, reason = %reason, "unparseable task left to expire");
                    stats.dropped += 1;
                }
                TaskDisposition::Deleted { .. } => stats.deleted += 1,
            }
            info!(task = %task, %disposition, "task finished");
        }
        Ok((task, Err(e))) => {
            // the queue redelivers the task once its lease runs out
            error!(task = %task, error = %e, "task could not be finalized");
            stats.finalize_failed += 1;
        }
        Err(e) => {
            error!(error = %e, "dispatch unit panicked");
            stats.panicked += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    use crate::domain::{PushPayload, QueueId, RetryConfig, TaskName, time_before_next};
    use crate::impls::{InMemoryQueueService, QueueCall, QueueOp};
    use crate::ports::{AcknowledgeRequest, RenewLeaseRequest};
    use crate::testing::ScriptedTransport;

    /// Delegates to the in-memory queue and timestamps every lease call.
    struct TimedQueue {
        inner: InMemoryQueueService,
        lease_times: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl QueueService for TimedQueue {
        async fn lease(&self, request: LeaseRequest) -> Result<Option<LeasedTask>, QueueError> {
            self.lease_times.lock().await.push(Instant::now());
            self.inner.lease(request).await
        }
        async fn acknowledge(&self, request: AcknowledgeRequest) -> Result<(), QueueError> {
            self.inner.acknowledge(request).await
        }
        async fn renew_lease(&self, request: RenewLeaseRequest) -> Result<LeasedTask, QueueError> {
            self.inner.renew_lease(request).await
        }
        async fn delete(&self, name: &TaskName) -> Result<(), QueueError> {
            self.inner.delete(name).await
        }
    }

    struct Harness {
        queue: InMemoryQueueService,
        timed: Arc<TimedQueue>,
        transport: Arc<ScriptedTransport>,
        config: WorkerConfig,
    }

    impl Harness {
        fn new(transport: ScriptedTransport) -> Self {
            let config = WorkerConfig::new("proj");
            let queue = InMemoryQueueService::new(config.queue_id());
            let timed = Arc::new(TimedQueue {
                inner: queue.clone(),
                lease_times: Mutex::new(Vec::new()),
            });
            Self {
                queue,
                timed,
                transport: Arc::new(transport),
                config,
            }
        }

        /// Run the poller for `duration` of (virtual) time, then shut it down.
        async fn run_for(&self, duration: Duration) -> Result<WorkerStats, PollerError> {
            let poller = Poller::new(
                self.config.clone(),
                self.timed.clone(),
                Dispatcher::new(self.transport.clone()),
            )?;
            let (tx, rx) = watch::channel(false);
            let run = tokio::spawn(async move { poller.run(rx).await });
            tokio::time::sleep(duration).await;
            let _ = tx.send(true);
            run.await.expect("poller task panicked")
        }

        async fn lease_offsets(&self, start: Instant) -> Vec<Duration> {
            self.timed
                .lease_times
                .lock()
                .await
                .iter()
                .map(|t| t.duration_since(start))
                .collect()
        }

        async fn finalize_calls(&self) -> Vec<QueueCall> {
            self.queue
                .calls()
                .await
                .into_iter()
                .filter(|c| !matches!(c, QueueCall::Lease { .. }))
                .collect()
        }
    }

    fn push_payload() -> Vec<u8> {
        PushPayload::new("POST", "https://example.com/x")
            .with_body("body")
            .encode()
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_backs_off_with_pull_policy() {
        let h = Harness::new(ScriptedTransport::status(200));
        let start = Instant::now();

        let stats = h.run_for(Duration::from_secs(7)).await.unwrap();

        // pull defaults: 2s, 4s, 8s, ...
        let pull = h.config.pull_backoff;
        assert_eq!(
            h.lease_offsets(start).await,
            vec![
                Duration::ZERO,
                time_before_next(1, pull.min, pull.max, pull.max_doublings),
                Duration::from_secs(6),
            ]
        );
        assert_eq!(stats.empty_polls, 3);
        assert_eq!(stats.leased, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_is_acknowledged_with_lease_token() {
        let h = Harness::new(ScriptedTransport::status(204));
        let name = h.queue.push(push_payload()).await;

        let stats = h.run_for(Duration::from_millis(1500)).await.unwrap();

        let calls = h.finalize_calls().await;
        assert_eq!(calls.len(), 1);
        let QueueCall::Acknowledge { name: acked, .. } = &calls[0] else {
            panic!("expected acknowledge, got {calls:?}");
        };
        assert_eq!(acked, &name);
        assert!(h.queue.is_empty().await);
        assert_eq!(stats.acknowledged, 1);
        assert_eq!(stats.renewed, 0);

        let sent = h.transport.sent.lock().await;
        assert_eq!(sent[0].url.as_str(), "https://example.com/x");
        assert_eq!(sent[0].body, "body");
    }

    #[tokio::test(start_paused = true)]
    async fn failure_renews_for_next_attempt_backoff() {
        let h = Harness::new(ScriptedTransport::status(503));
        let name = TaskName::new(format!("{}/tasks/retry-me", h.config.queue_id()));
        h.queue.push_named(name.clone(), push_payload(), 2).await;

        let stats = h.run_for(Duration::from_millis(1500)).await.unwrap();

        let push = h.config.push_backoff;
        let expected = time_before_next(3, push.min, push.max, push.max_doublings);
        assert_eq!(expected, Duration::from_secs(20));

        let calls = h.finalize_calls().await;
        assert!(matches!(
            calls.as_slice(),
            [QueueCall::RenewLease { name: renewed, lease_duration, .. }]
                if renewed == &name && *lease_duration == expected
        ));
        assert_eq!(stats.renewed, 1);
        assert!(h.queue.contains(&name).await);
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_payload_is_left_to_expire() {
        let h = Harness::new(ScriptedTransport::status(200));
        let name = h.queue.push(b"definitely not json".to_vec()).await;

        let stats = h.run_for(Duration::from_millis(1500)).await.unwrap();

        assert_eq!(h.transport.sent_count().await, 0);
        assert!(h.finalize_calls().await.is_empty());
        assert!(h.queue.contains(&name).await);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_policy_removes_unparseable_task() {
        let mut h = Harness::new(ScriptedTransport::status(200));
        h.config.on_unparseable = UnparseablePolicy::Delete;
        let name = h.queue.push(b"[]".to_vec()).await;

        let stats = h.run_for(Duration::from_millis(1500)).await.unwrap();

        assert_eq!(
            h.finalize_calls().await,
            vec![QueueCall::Delete { name: name.clone() }]
        );
        assert!(!h.queue.contains(&name).await);
        assert_eq!(stats.deleted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_failure_does_not_stop_the_loop() {
        let mut h = Harness::new(ScriptedTransport::status(200));
        h.config.finalize_retry = RetryConfig::new(
            2,
            BackoffConfig::new(Duration::from_millis(10), Duration::from_millis(10), 0),
        );
        h.queue.fail_next(QueueOp::Acknowledge, 2).await;
        h.queue.push(push_payload()).await;
        h.queue.push(push_payload()).await;

        let stats = h.run_for(Duration::from_millis(2500)).await.unwrap();

        assert_eq!(stats.leased, 2);
        assert_eq!(stats.finalize_failed, 1);
        assert_eq!(stats.acknowledged, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_lease_errors_are_retried() {
        let h = Harness::new(ScriptedTransport::status(200));
        h.queue.fail_next(QueueOp::Lease, 2).await;
        h.queue.push(push_payload()).await;

        let stats = h.run_for(Duration::from_secs(5)).await.unwrap();

        assert_eq!(stats.acknowledged, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_lease_errors_stop_the_poller() {
        let mut h = Harness::new(ScriptedTransport::status(200));
        h.config.lease_retry = RetryConfig::new(
            3,
            BackoffConfig::new(Duration::from_millis(100), Duration::from_secs(1), 2),
        );
        h.queue.fail_next(QueueOp::Lease, 10).await;

        let err = h.run_for(Duration::from_secs(60)).await.unwrap_err();

        assert!(matches!(err, PollerError::Lease(QueueError::Unavailable(_))));
        assert_eq!(h.timed.lease_times.lock().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn leases_that_find_work_are_spaced_by_rate() {
        let mut h = Harness::new(ScriptedTransport::status(200));
        h.config.rate = Duration::from_millis(750);
        h.queue.push(push_payload()).await;
        h.queue.push(push_payload()).await;
        let start = Instant::now();

        let stats = h.run_for(Duration::from_secs(1)).await.unwrap();

        assert_eq!(
            h.lease_offsets(start).await,
            vec![Duration::ZERO, h.config.rate]
        );
        assert_eq!(stats.acknowledged, 2);
        assert_eq!(stats.empty_polls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_lease_retry_stops_promptly() {
        let mut h = Harness::new(ScriptedTransport::status(200));
        h.config.pull_backoff =
            BackoffConfig::new(Duration::from_secs(30), Duration::from_secs(30), 0);
        h.queue.fail_next(QueueOp::Lease, 1).await;
        let start = Instant::now();

        let stats = h.run_for(Duration::from_millis(500)).await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
        assert_eq!(stats.empty_polls, 0);
        assert_eq!(h.timed.lease_times.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn renewal_hands_back_the_fresh_token() {
        let queue = InMemoryQueueService::new(QueueId::new("p", "l", "q"));
        queue.push(push_payload()).await;
        let task = queue
            .lease(LeaseRequest::one(
                queue.queue_id().clone(),
                WireDuration { seconds: 60, nanos: 0 },
            ))
            .await
            .unwrap()
            .unwrap();
        let shared: Arc<dyn QueueService> = Arc::new(queue.clone());
        let pipeline = TaskPipeline::new(
            Dispatcher::new(Arc::new(ScriptedTransport::status(500))),
            LeaseManager::new(Arc::clone(&shared), RetryConfig::none()),
            BackoffConfig::push_default(),
            UnparseablePolicy::Expire,
        );

        let disposition = pipeline.process(&task).await.unwrap();

        let TaskDisposition::Renewed { retry_in, schedule_time } = disposition else {
            panic!("expected renewal, got {disposition:?}");
        };
        assert_eq!(retry_in, Duration::from_secs(5));
        assert_ne!(schedule_time, task.schedule_time());
        // only the token from the renewal is accepted now
        shared
            .acknowledge(AcknowledgeRequest {
                name: task.name().clone(),
                schedule_time,
            })
            .await
            .unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_units_are_bounded() {
        let mut h = Harness::new(ScriptedTransport::status(200).slow(Duration::from_secs(10)));
        h.config.max_in_flight = 1;
        h.queue.push(push_payload()).await;
        h.queue.push(push_payload()).await;
        let start = Instant::now();

        let stats = h.run_for(Duration::from_secs(15)).await.unwrap();

        let offsets = h.lease_offsets(start).await;
        // the second lease waits for the first push to finish
        assert_eq!(offsets[0], Duration::ZERO);
        assert_eq!(offsets[1], Duration::from_secs(10));
        assert_eq!(stats.acknowledged, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_in_flight_pushes() {
        let h = Harness::new(ScriptedTransport::status(200).slow(Duration::from_secs(30)));
        h.queue.push(push_payload()).await;

        let stats = h.run_for(Duration::from_millis(1500)).await.unwrap();

        assert_eq!(stats.acknowledged, 1);
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_sender_stops_the_poller() {
        let h = Harness::new(ScriptedTransport::status(200));
        let poller = Poller::new(
            h.config.clone(),
            h.timed.clone(),
            Dispatcher::new(h.transport.clone()),
        )
        .unwrap();
        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(async move { poller.run(rx).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(tx);

        let stats = run.await.unwrap().unwrap();
        assert_eq!(stats.empty_polls, 1);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = WorkerConfig::new("proj");
        config.max_in_flight = 0;
        let queue = Arc::new(InMemoryQueueService::new(QueueId::new("proj", "l", "q")));
        let dispatcher = Dispatcher::new(Arc::new(ScriptedTransport::status(200)));

        assert!(matches!(
            Poller::new(config, queue, dispatcher),
            Err(PollerError::InvalidConfig(ConfigError::Zero("max_in_flight")))
        ));
    }
}
