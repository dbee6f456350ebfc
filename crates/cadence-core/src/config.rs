use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
/// Longest accepted poll interval (one day). Larger values are capped.
pub const MAX_POLL_INTERVAL_MS: u64 = 86_400_000;
pub const DEFAULT_MAX_WORKERS: usize = 16;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Interval tasks driven by the runner binary. Ignored by the library.
    #[serde(default)]
    pub tasks: Vec<IntervalTaskConfig>,
}

/// Engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick period of the poller. Also the minimum delay a task may request;
    /// the two are kept equal so nothing fires early or waits a full extra tick.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay before an out-of-cadence retry. 0 means "use the poll interval".
    #[serde(default)]
    pub retry_delay_ms: u64,
    /// Allow at most one in-flight run per task id.
    #[serde(default)]
    pub exclusive_runs: bool,
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry_delay_ms: 0,
            exclusive_runs: false,
            worker_pool: WorkerPoolConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Effective poll interval; a zero value falls back to the default and
    /// anything above [`MAX_POLL_INTERVAL_MS`] is capped.
    pub fn poll_interval(&self) -> Duration {
        match self.poll_interval_ms {
            0 => Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            ms => Duration::from_millis(ms.min(MAX_POLL_INTERVAL_MS)),
        }
    }

    /// Explicit retry delay, if one was configured.
    pub fn retry_delay(&self) -> Option<Duration> {
        (self.retry_delay_ms > 0).then(|| Duration::from_millis(self.retry_delay_ms))
    }
}

/// Which worker pool executes task runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerPoolConfig {
    /// Growable pool backed by the Tokio blocking thread pool.
    Unbounded,
    /// At most `max_workers` concurrent runs; extra submissions are rejected
    /// and retried on the next poll.
    Bounded {
        #[serde(default = "default_max_workers")]
        max_workers: usize,
    },
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::Unbounded
    }
}

/// A fixed-interval task declared in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalTaskConfig {
    pub id: String,
    pub every_ms: u64,
    /// Logged on every run.
    #[serde(default)]
    pub message: Option<String>,
    /// Stop the series after this many completed runs. `None` runs forever.
    #[serde(default)]
    pub max_runs: Option<u32>,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Uses the explicit path if given, otherwise ~/.cadence/cadence.toml.
    /// A missing file is not an error; every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CadenceError::Config(e.to_string()))
    }

    /// The provider stack used by [`CadenceConfig::load`].
    pub fn figment(path: &str) -> Figment {
        // Nested keys use a double underscore: CADENCE_SCHEDULER__POLL_INTERVAL_MS.
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CADENCE_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}
