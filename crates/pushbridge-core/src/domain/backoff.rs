//! Backoff policy: decides how long to wait before the next attempt.
//!
//! One formula serves every retry class in the worker. It reproduces the push
//! queue retry contract: the wait starts at `min`, doubles `max_doublings`
//! times, then grows linearly by the last doubled step, and never exceeds
//! `max`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait before attempt number `attempt`.
///
/// `attempt = 1` is the wait before the first retry (`min`). `attempt = 0`
/// means nothing has happened yet, so there is no wait.
///
/// Example with min=5s, max=10m, max_doublings=5:
/// - attempt 1..=5: 5s, 10s, 20s, 40s, 80s
/// - attempt 6: 160s, attempt 7: 320s
/// - attempt 8: 480s (first step without doubling)
/// - attempt 9: 600s (capped)
pub fn time_before_next(
    attempt: u32,
    min_backoff: Duration,
    max_backoff: Duration,
    max_doublings: u32,
) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let min = min_backoff.as_nanos();
    let nanos = if attempt > max_doublings {
        let step = doubled(min, max_doublings);
        step.saturating_mul(u128::from(attempt - max_doublings))
    } else {
        doubled(min, attempt - 1)
    };

    from_nanos(nanos.min(max_backoff.as_nanos()))
}

/// `base * 2^exp` in nanoseconds, saturating.
fn doubled(base: u128, exp: u32) -> u128 {
    if base == 0 {
        return 0;
    }
    1u128
        .checked_shl(exp)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(u128::MAX)
}

fn from_nanos(nanos: u128) -> Duration {
    let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    let subsec = u32::try_from(nanos % 1_000_000_000).unwrap_or(0);
    Duration::new(secs, subsec)
}

/// Parameters for one class of backoff (pull polling, push retry, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Wait before the first retry.
    pub min: Duration,

    /// Upper bound for any single wait.
    pub max: Duration,

    /// Number of doublings before growth becomes linear.
    pub max_doublings: u32,
}

impl BackoffConfig {
    pub fn new(min: Duration, max: Duration, max_doublings: u32) -> Self {
        Self {
            min,
            max,
            max_doublings,
        }
    }

    /// Defaults used when the queue has no work to hand out.
    pub fn pull_default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(30), 4)
    }

    /// Defaults used when a push attempt fails.
    pub fn push_default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(60 * 60), 5)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        time_before_next(attempt, self.min, self.max, self.max_doublings)
    }
}
