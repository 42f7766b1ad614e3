//! Settings resolution: explicit flag > config file > built-in default.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use pushbridge_core::domain::{PushPayload, UnparseablePolicy, WorkerConfig};
use serde::{Deserialize, Deserializer};

use crate::cli::RunArgs;
use crate::duration::parse_duration;

/// Contents of the `--config` YAML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub project: Option<String>,
    pub location: Option<String>,
    pub queue: Option<String>,
    #[serde(deserialize_with = "go_duration")]
    pub rate: Option<Duration>,
    #[serde(deserialize_with = "go_duration")]
    pub lease_duration: Option<Duration>,
    #[serde(deserialize_with = "go_duration")]
    pub pull_min_backoff: Option<Duration>,
    #[serde(deserialize_with = "go_duration")]
    pub pull_max_backoff: Option<Duration>,
    pub pull_max_doublings: Option<u32>,
    #[serde(deserialize_with = "go_duration")]
    pub push_min_backoff: Option<Duration>,
    #[serde(deserialize_with = "go_duration")]
    pub push_max_backoff: Option<Duration>,
    pub push_max_doublings: Option<u32>,
    pub max_in_flight: Option<usize>,
    pub on_unparseable: Option<UnparseablePolicy>,
}

fn go_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|raw| parse_duration(&raw).map_err(serde::de::Error::custom))
        .transpose()
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Merge flags over the file over the defaults, then validate.
pub fn resolve(args: &RunArgs, file: FileConfig) -> Result<WorkerConfig> {
    let project = args
        .project
        .clone()
        .or(file.project)
        .ok_or_else(|| anyhow!("--project is required (flag or `project` in the config file)"))?;

    let mut config = WorkerConfig::new(project);
    if let Some(location) = args.location.clone().or(file.location) {
        config.location = location;
    }
    if let Some(queue) = args.queue.clone().or(file.queue) {
        config.queue = queue;
    }
    if let Some(rate) = args.rate.or(file.rate) {
        config.rate = rate;
    }
    if let Some(lease) = args.lease_duration.or(file.lease_duration) {
        config.lease_duration = lease;
    }

    let pull = &mut config.pull_backoff;
    if let Some(min) = args.pull_min_backoff.or(file.pull_min_backoff) {
        pull.min = min;
    }
    if let Some(max) = args.pull_max_backoff.or(file.pull_max_backoff) {
        pull.max = max;
    }
    if let Some(doublings) = args.pull_max_doublings.or(file.pull_max_doublings) {
        pull.max_doublings = doublings;
    }

    let push = &mut config.push_backoff;
    if let Some(min) = args.push_min_backoff.or(file.push_min_backoff) {
        push.min = min;
    }
    if let Some(max) = args.push_max_backoff.or(file.push_max_backoff) {
        push.max = max;
    }
    if let Some(doublings) = args.push_max_doublings.or(file.push_max_doublings) {
        push.max_doublings = doublings;
    }

    if let Some(max_in_flight) = args.max_in_flight.or(file.max_in_flight) {
        config.max_in_flight = max_in_flight;
    }
    if let Some(policy) = args.on_unparseable.or(file.on_unparseable) {
        config.on_unparseable = policy;
    }

    config.validate().context("invalid worker configuration")?;
    Ok(config)
}

/// Read the `--tasks` file: a JSON array of push payloads.
pub fn load_tasks(path: &Path) -> Result<Vec<PushPayload>> {
    let contents = std::fs::read(path)
        .with_context(|| format!("reading tasks file {}", path.display()))?;
    serde_json::from_slice(&contents)
        .with_context(|| format!("parsing tasks file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let args = RunArgs {
            project: Some("proj".into()),
            ..Default::default()
        };
        let config = resolve(&args, FileConfig::default()).unwrap();
        assert_eq!(config, WorkerConfig::new("proj"));
    }

    #[test]
    fn flags_override_file_values() {
        let file = write_file(
            "project: from-file\nqueue: file-queue\nrate: 5s\npush_max_backoff: 10m\n",
        );
        let file_config = FileConfig::from_file(file.path()).unwrap();
        let args = RunArgs {
            queue: Some("flag-queue".into()),
            rate: Some(Duration::from_millis(200)),
            ..Default::default()
        };

        let config = resolve(&args, file_config).unwrap();

        assert_eq!(config.project, "from-file");
        assert_eq!(config.queue, "flag-queue");
        assert_eq!(config.rate, Duration::from_millis(200));
        assert_eq!(config.push_backoff.max, Duration::from_secs(600));
        assert_eq!(config.location, "us-central1");
    }

    #[test]
    fn missing_project_is_an_error() {
        let err = resolve(&RunArgs::default(), FileConfig::default()).unwrap_err();
        assert!(err.to_string().contains("--project"));
    }

    #[test]
    fn invalid_combination_is_rejected() {
        let args = RunArgs {
            project: Some("proj".into()),
            pull_min_backoff: Some(Duration::from_secs(60)),
            pull_max_backoff: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        assert!(resolve(&args, FileConfig::default()).is_err());
    }

    #[test]
    fn unknown_keys_and_bad_durations_fail_to_load() {
        let typo = write_file("projcet: p\n");
        assert!(FileConfig::from_file(typo.path()).is_err());

        let bad = write_file("rate: soon\n");
        assert!(FileConfig::from_file(bad.path()).is_err());
    }

    #[test]
    fn file_policy_is_snake_case() {
        let file = write_file("project: p\non_unparseable: delete\n");
        let config = resolve(&RunArgs::default(), FileConfig::from_file(file.path()).unwrap()).unwrap();
        assert_eq!(config.on_unparseable, UnparseablePolicy::Delete);
    }

    #[test]
    fn tasks_file_is_a_payload_array() {
        let file = write_file(
            r#"[{"method":"POST","absUrl":"https://example.com/a","payload":"hi"},
                {"method":"GET","absUrl":"https://example.com/b","headers":{"X-A":"1"}}]"#,
        );
        let tasks = load_tasks(file.path()).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].abs_url, "https://example.com/a");
        assert_eq!(tasks[1].body(), "");
    }
}
