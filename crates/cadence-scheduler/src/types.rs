use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use cadence_core::{RunId, TaskId};

use crate::task::Task;

/// Lifecycle of a single run. Moves forward only, exactly once per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Waiting in the ready queue.
    Scheduled,
    /// Picked up by a worker; `run` is in progress.
    Executing,
    /// `run` returned a value.
    Succeeded,
    /// `run` returned an error or panicked.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Scheduled => "scheduled",
            RunStatus::Executing => "executing",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// What a finished run produced. `Pending` until the worker returns.
#[derive(Debug)]
pub enum RunOutcome<R> {
    Pending,
    Succeeded(R),
    Failed(anyhow::Error),
}

/// One scheduled occurrence of a task.
///
/// Created at schedule time and never reused: a later run of the same task
/// gets a fresh `TaskRun` with a new run id.
pub struct TaskRun<T: Task> {
    run_id: RunId,
    task: Arc<T>,
    target_execution_time: DateTime<Utc>,
    /// Set when a worker starts executing.
    actual_start_time: Option<DateTime<Utc>>,
    outcome: RunOutcome<T::Output>,
}

impl<T: Task> TaskRun<T> {
    pub fn new(run_id: RunId, task: Arc<T>, target_execution_time: DateTime<Utc>) -> Self {
        Self {
            run_id,
            task,
            target_execution_time,
            actual_start_time: None,
            outcome: RunOutcome::Pending,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn task(&self) -> &Arc<T> {
        &self.task
    }

    pub fn task_id(&self) -> TaskId {
        self.task.id()
    }

    pub fn target_execution_time(&self) -> DateTime<Utc> {
        self.target_execution_time
    }

    pub fn actual_start_time(&self) -> Option<DateTime<Utc>> {
        self.actual_start_time
    }

    pub fn outcome(&self) -> &RunOutcome<T::Output> {
        &self.outcome
    }

    /// The value returned by a successful run.
    pub fn result(&self) -> Option<&T::Output> {
        match &self.outcome {
            RunOutcome::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    /// The error captured from a failed run.
    pub fn failure(&self) -> Option<&anyhow::Error> {
        match &self.outcome {
            RunOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Failed(_))
    }

    pub fn status(&self) -> RunStatus {
        match (&self.outcome, self.actual_start_time) {
            (RunOutcome::Succeeded(_), _) => RunStatus::Succeeded,
            (RunOutcome::Failed(_), _) => RunStatus::Failed,
            (RunOutcome::Pending, Some(_)) => RunStatus::Executing,
            (RunOutcome::Pending, None) => RunStatus::Scheduled,
        }
    }

    /// How late the run started relative to its target.
    ///
    /// Before dispatch there is no start stamp, so `now` stands in for it;
    /// a negative result then only means the run is not yet due.
    pub fn drift(&self, now: DateTime<Utc>) -> Duration {
        self.actual_start_time.unwrap_or(now) - self.target_execution_time
    }

    pub(crate) fn mark_started(&mut self, at: DateTime<Utc>) {
        debug_assert!(self.actual_start_time.is_none(), "run started twice");
        self.actual_start_time = Some(at);
    }

    pub(crate) fn complete(&mut self, result: anyhow::Result<T::Output>) {
        debug_assert!(
            matches!(self.outcome, RunOutcome::Pending),
            "run completed twice"
        );
        self.outcome = match result {
            Ok(value) => RunOutcome::Succeeded(value),
            Err(error) => RunOutcome::Failed(error),
        };
    }
}

impl<T: Task> fmt::Debug for TaskRun<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRun")
            .field("run_id", &self.run_id)
            .field("task_id", &self.task_id())
            .field("target_execution_time", &self.target_execution_time)
            .field("actual_start_time", &self.actual_start_time)
            .field("status", &self.status())
            .finish()
    }
}
