use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use cadence_core::IntervalTaskConfig;
use cadence_scheduler::{MaxRuns, StopStrategy, Task, TaskId, TaskRun};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

/// A config-declared task that fires every `every_ms` milliseconds.
pub struct IntervalTask {
    id: TaskId,
    every: Duration,
    message: Option<String>,
    fired: AtomicU64,
}

impl IntervalTask {
    pub fn from_config(config: &IntervalTaskConfig) -> Self {
        Self {
            id: TaskId::new(config.id.clone()),
            every: Duration::milliseconds(i64::try_from(config.every_ms).unwrap_or(i64::MAX)),
            message: config.message.clone(),
            fired: AtomicU64::new(0),
        }
    }
}

impl Task for IntervalTask {
    /// Sequence number of the run within this process, starting at 1.
    type Output = u64;

    fn id(&self) -> TaskId {
        self.id.clone()
    }

    fn delay_to_next_run(&self, _reference: DateTime<Utc>) -> Duration {
        self.every
    }

    fn run(&self, now: DateTime<Utc>, run: &TaskRun<Self>) -> anyhow::Result<u64> {
        let seq = self.fired.fetch_add(1, Ordering::Relaxed) + 1;
        let late_ms = run.drift(now).num_milliseconds();
        info!(
            task_id = %self.id,
            run_id = %run.run_id(),
            seq,
            late_ms,
            message = self.message.as_deref().unwrap_or(""),
            "interval task fired"
        );
        Ok(seq)
    }
}

/// Per-task `max_runs` limits. Tasks without a limit run until shutdown.
#[derive(Default)]
pub struct RunLimits {
    limits: HashMap<TaskId, MaxRuns>,
}

impl RunLimits {
    pub fn from_config(tasks: &[IntervalTaskConfig]) -> Self {
        let limits = tasks
            .iter()
            .filter_map(|t| t.max_runs.map(|n| (TaskId::new(t.id.clone()), MaxRuns::new(n))))
            .collect();
        Self { limits }
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }
}

impl StopStrategy<IntervalTask> for RunLimits {
    fn schedule_next(&self, run: &TaskRun<IntervalTask>) -> bool {
        match self.limits.get(&run.task_id()) {
            Some(limit) => limit.schedule_next(run),
            None => true,
        }
    }
}
