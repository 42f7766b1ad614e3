//! Wire representations of durations and timestamps used by the queue service.
//!
//! Both are `{seconds, nanos}` pairs. Conversions are exact: no sub-second
//! precision is lost in either direction.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const NANOS_PER_SECOND: i32 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("negative duration on the wire: {seconds}s {nanos}ns")]
    NegativeDuration { seconds: i64, nanos: i32 },

    #[error("nanos out of range: {0}")]
    NanosOutOfRange(i32),

    #[error("duration too large for the wire: {0:?}")]
    DurationOverflow(Duration),

    #[error("timestamp out of range: {seconds}s {nanos}ns")]
    TimestampOutOfRange { seconds: i64, nanos: i32 },
}

/// A span of time as `{seconds, nanos}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WireDuration {
    pub seconds: i64,
    pub nanos: i32,
}

impl TryFrom<Duration> for WireDuration {
    type Error = WireError;

    fn try_from(duration: Duration) -> Result<Self, Self::Error> {
        let seconds =
            i64::try_from(duration.as_secs()).map_err(|_| WireError::DurationOverflow(duration))?;
        // subsec_nanos() < 1e9, always fits
        let nanos = duration.subsec_nanos() as i32;
        Ok(Self { seconds, nanos })
    }
}

impl TryFrom<WireDuration> for Duration {
    type Error = WireError;

    fn try_from(wire: WireDuration) -> Result<Self, Self::Error> {
        if !(0..NANOS_PER_SECOND).contains(&wire.nanos) {
            return Err(WireError::NanosOutOfRange(wire.nanos));
        }
        let seconds = u64::try_from(wire.seconds).map_err(|_| WireError::NegativeDuration {
            seconds: wire.seconds,
            nanos: wire.nanos,
        })?;
        Ok(Duration::new(seconds, wire.nanos as u32))
    }
}

/// A point in time as `{seconds, nanos}` since the Unix epoch (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WireTimestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl WireTimestamp {
    pub fn to_datetime(self) -> Result<DateTime<Utc>, WireError> {
        let out_of_range = WireError::TimestampOutOfRange {
            seconds: self.seconds,
            nanos: self.nanos,
        };
        let nanos = u32::try_from(self.nanos).map_err(|_| out_of_range.clone())?;
        if nanos >= NANOS_PER_SECOND as u32 {
            return Err(out_of_range);
        }
        DateTime::from_timestamp(self.seconds, nanos).ok_or(out_of_range)
    }
}

impl From<DateTime<Utc>> for WireTimestamp {
    fn from(at: DateTime<Utc>) -> Self {
        Self {
            seconds: at.timestamp(),
            // below 1e9 except during a leap second, which the wire cannot express
            nanos: at.timestamp_subsec_nanos().min(NANOS_PER_SECOND as u32 - 1) as i32,
        }
    }
}

impl TryFrom<WireTimestamp> for DateTime<Utc> {
    type Error = WireError;

    fn try_from(wire: WireTimestamp) -> Result<Self, Self::Error> {
        wire.to_datetime()
    }
}
