//! Policies consulted after every completed run.
//!
//! | Strategy          | Consulted after | Default          |
//! |-------------------|-----------------|------------------|
//! | [`StopStrategy`]  | every run       | [`AlwaysContinue`] |
//! | [`RetryStrategy`] | failed runs     | [`NeverRetry`]   |
//!
//! Both are implemented for plain closures over `&TaskRun<T>`.

use dashmap::DashMap;

use cadence_core::TaskId;

use crate::task::Task;
use crate::types::TaskRun;

/// Decides whether a series continues on its normal cadence.
pub trait StopStrategy<T: Task>: Send + Sync {
    /// `true` schedules the next run.
    fn schedule_next(&self, run: &TaskRun<T>) -> bool;
}

/// Decides whether a failed run gets an out-of-cadence retry.
pub trait RetryStrategy<T: Task>: Send + Sync {
    /// `true` schedules a retry after the configured retry delay instead of
    /// the task's own delay.
    fn should_retry(&self, run: &TaskRun<T>) -> bool;
}

/// Keeps every series running forever.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysContinue;

impl<T: Task> StopStrategy<T> for AlwaysContinue {
    fn schedule_next(&self, _run: &TaskRun<T>) -> bool {
        true
    }
}

/// Failed runs are not retried; the series carries on at its normal cadence.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverRetry;

impl<T: Task> RetryStrategy<T> for NeverRetry {
    fn should_retry(&self, _run: &TaskRun<T>) -> bool {
        false
    }
}

/// Stops each task id after `limit` completed runs.
#[derive(Debug)]
pub struct MaxRuns {
    limit: u32,
    completed: DashMap<TaskId, u32>,
}

impl MaxRuns {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            completed: DashMap::new(),
        }
    }

    /// Completed runs seen so far for `task_id`.
    pub fn completed(&self, task_id: &TaskId) -> u32 {
        self.completed.get(task_id).map(|c| *c).unwrap_or(0)
    }
}

impl<T: Task> StopStrategy<T> for MaxRuns {
    fn schedule_next(&self, run: &TaskRun<T>) -> bool {
        let mut count = self.completed.entry(run.task_id()).or_insert(0);
        *count += 1;
        *count < self.limit
    }
}

impl<T, F> StopStrategy<T> for F
where
    T: Task,
    F: Fn(&TaskRun<T>) -> bool + Send + Sync,
{
    fn schedule_next(&self, run: &TaskRun<T>) -> bool {
        self(run)
    }
}

impl<T, F> RetryStrategy<T> for F
where
    T: Task,
    F: Fn(&TaskRun<T>) -> bool + Send + Sync,
{
    fn should_retry(&self, run: &TaskRun<T>) -> bool {
        self(run)
    }
}
