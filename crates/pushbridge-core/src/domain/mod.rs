//! Domain model (config, backoff, tasks, payloads, outcomes, errors).

pub mod backoff;
pub mod config;
pub mod errors;
pub mod outcome;
pub mod payload;
pub mod task;
pub mod wire;

pub use backoff::{BackoffConfig, time_before_next};
pub use config::{RetryConfig, UnparseablePolicy, WorkerConfig};
pub use errors::{ConfigError, ErrorKind, RequestBuildError};
pub use outcome::{DispatchOutcome, TaskDisposition};
pub use payload::{DecodeError, PushPayload};
pub use task::{LeasedTask, QueueId, ScheduleTime, TaskName};
pub use wire::{WireDuration, WireError, WireTimestamp};
