use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use pushbridge_core::domain::UnparseablePolicy;
use pushbridge_core::observability::LogFormat;

use crate::duration::parse_duration;

#[derive(Parser, Debug)]
#[command(name = "pushbridge")]
#[command(about = "Lease tasks from a pull queue and deliver them as HTTP pushes", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the worker until Ctrl-C
    Run(RunArgs),
}

/// Flags left unset fall back to the config file, then to the built-in default.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Project that owns the queue
    #[arg(long)]
    pub project: Option<String>,

    /// Queue location [default: us-central1]
    #[arg(long)]
    pub location: Option<String>,

    /// Queue name [default: pull-to-push]
    #[arg(long)]
    pub queue: Option<String>,

    /// Pause between leases that found work [default: 1s]
    #[arg(long, value_parser = parse_duration)]
    pub rate: Option<Duration>,

    /// Lease requested per task, also the push timeout [default: 60s]
    #[arg(long, value_parser = parse_duration)]
    pub lease_duration: Option<Duration>,

    /// First wait after an empty poll [default: 2s]
    #[arg(long, value_parser = parse_duration)]
    pub pull_min_backoff: Option<Duration>,

    /// Longest wait between empty polls [default: 30s]
    #[arg(long, value_parser = parse_duration)]
    pub pull_max_backoff: Option<Duration>,

    /// Doublings of the empty-poll wait before linear growth [default: 4]
    #[arg(long)]
    pub pull_max_doublings: Option<u32>,

    /// First retry delay after a failed push [default: 5s]
    #[arg(long, value_parser = parse_duration)]
    pub push_min_backoff: Option<Duration>,

    /// Longest retry delay after a failed push [default: 1h]
    #[arg(long, value_parser = parse_duration)]
    pub push_max_backoff: Option<Duration>,

    /// Doublings of the push retry delay before linear growth [default: 5]
    #[arg(long)]
    pub push_max_doublings: Option<u32>,

    /// Maximum pushes in flight at once [default: 64]
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// What to do with payloads that can never be pushed: expire or delete [default: expire]
    #[arg(long, value_parser = parse_policy)]
    pub on_unparseable: Option<UnparseablePolicy>,

    /// YAML file with any of the settings above
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// JSON array of push payloads to seed the in-memory queue with
    #[arg(long)]
    pub tasks: Option<PathBuf>,

    /// Log output format
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,
}

fn parse_policy(raw: &str) -> Result<UnparseablePolicy, String> {
    match raw.to_ascii_lowercase().as_str() {
        "expire" => Ok(UnparseablePolicy::Expire),
        "delete" => Ok(UnparseablePolicy::Delete),
        other => Err(format!("unknown policy `{other}` (expected expire or delete)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(extra: &[&str]) -> RunArgs {
        let argv = ["pushbridge", "run"].into_iter().chain(extra.iter().copied());
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
        }
    }

    #[test]
    fn unset_flags_stay_unset() {
        let args = run_args(&["--project", "p"]);
        assert_eq!(args.project.as_deref(), Some("p"));
        assert!(args.rate.is_none());
        assert!(args.queue.is_none());
        assert_eq!(args.log_format, LogFormat::Text);
    }

    #[test]
    fn durations_and_policy_parse() {
        let args = run_args(&[
            "--rate",
            "250ms",
            "--push-max-backoff",
            "2h",
            "--on-unparseable",
            "delete",
            "--log-format",
            "json",
        ]);
        assert_eq!(args.rate, Some(Duration::from_millis(250)));
        assert_eq!(args.push_max_backoff, Some(Duration::from_secs(7200)));
        assert_eq!(args.on_unparseable, Some(UnparseablePolicy::Delete));
        assert_eq!(args.log_format, LogFormat::Json);
    }

    #[test]
    fn bad_duration_is_a_usage_error() {
        let argv = ["pushbridge", "run", "--rate", "fast"];
        assert!(Cli::try_parse_from(argv).is_err());
    }
}
