//! Logging setup and worker counters.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format `{other}` (expected text or json)")),
        }
    }
}

/// Initialize tracing for the process. Filter comes from `RUST_LOG`, default `info`.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// Counters kept by the poller over one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub leased: u64,
    pub empty_polls: u64,
    pub acknowledged: u64,
    pub renewed: u64,
    pub dropped: u64,
    pub deleted: u64,
    /// Dispatch units whose ack/renew/delete could not be completed.
    pub finalize_failed: u64,
    /// Dispatch units that panicked.
    pub panicked: u64,
}

impl WorkerStats {
    pub fn completed(&self) -> u64 {
        self.acknowledged
            + self.renewed
            + self.dropped
            + self.deleted
            + self.finalize_failed
            + self.panicked
    }
}
