//! Outcome model: what a push attempt produced and what was done about it.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::task::ScheduleTime;

/// Classification of one push attempt.
///
/// - `Success`: the target answered 2xx; the task is acknowledged.
/// - `HttpFailure`: non-2xx, or no response at all (`status: None`); recoverable,
///   the lease is renewed with backoff.
/// - `FatalDecode` / `FatalRequestBuild`: the task can never succeed as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchOutcome {
    Success { status: u16 },
    HttpFailure { status: Option<u16> },
    FatalDecode { reason: String },
    FatalRequestBuild { reason: String },
}

impl DispatchOutcome {
    pub fn from_status(status: u16) -> Self {
        if (200..=299).contains(&status) {
            Self::Success { status }
        } else {
            Self::HttpFailure {
                status: Some(status),
            }
        }
    }

    pub fn transport_failure() -> Self {
        Self::HttpFailure { status: None }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Retrying the same payload cannot change the result.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FatalDecode { .. } | Self::FatalRequestBuild { .. }
        )
    }
}

/// What a dispatch unit finally did with its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDisposition {
    /// Removed from the queue after a successful push.
    Acknowledged,

    /// Lease extended; the queue redelivers after `retry_in`.
    /// `schedule_time` is the token issued by the renewal.
    Renewed {
        retry_in: Duration,
        schedule_time: ScheduleTime,
    },

    /// Left alone; the lease expires and the queue redelivers it.
    Dropped { reason: String },

    /// Unparseable task deleted from the queue.
    Deleted { reason: String },
}

impl fmt::Display for TaskDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acknowledged => f.write_str("acknowledged"),
            Self::Renewed { retry_in, .. } => write!(f, "renewed for {retry_in:?}"),
            Self::Dropped { reason } => write!(f, "dropped ({reason})"),
            Self::Deleted { reason } => write!(f, "deleted ({reason})"),
        }
    }
}
