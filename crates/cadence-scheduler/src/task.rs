use chrono::{DateTime, Duration, Utc};

use cadence_core::TaskId;

use crate::types::TaskRun;

/// A unit of recurring work.
///
/// The engine holds an `Arc` to the task for as long as one of its runs is
/// queued or executing. `run` executes on a worker thread and may block;
/// a hung task occupies its worker indefinitely.
pub trait Task: Send + Sync + Sized + 'static {
    /// Value produced by a successful run, surfaced through completion events.
    type Output: Send + 'static;

    /// Stable identity. Two runs of the same series share it.
    fn id(&self) -> TaskId;

    /// Delay from `reference` to the next run.
    ///
    /// Zero or negative ends the series: the engine schedules nothing further.
    /// Positive values below the poll interval are raised to the poll interval.
    fn delay_to_next_run(&self, reference: DateTime<Utc>) -> Duration;

    /// Execute one occurrence. `now` is the actual start time.
    fn run(&self, now: DateTime<Utc>, run: &TaskRun<Self>) -> anyhow::Result<Self::Output>;
}

/// Message of the innermost cause of a task failure.
pub fn error_message(error: &anyhow::Error) -> String {
    let message = error.root_cause().to_string();
    if message.is_empty() {
        "unknown error".to_string()
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[derive(Debug, thiserror::Error)]
    #[error("")]
    struct Silent;

    #[test]
    fn error_message_uses_innermost_cause() {
        let err = Err::<(), _>(anyhow::anyhow!("forced failure"))
            .context("outer wrapper")
            .unwrap_err();
        assert_eq!(error_message(&err), "forced failure");
    }

    #[test]
    fn error_message_without_text() {
        let err = anyhow::Error::new(Silent);
        assert_eq!(error_message(&err), "unknown error");
    }
}
