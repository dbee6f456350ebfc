use thiserror::Error;

/// Errors from scheduler lifecycle calls.
///
/// Task failures never surface here; they travel in the completion event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// `start` was called outside a Tokio runtime.
    #[error("Scheduler must be started from within a Tokio runtime")]
    NoRuntime,

    #[error("Scheduler is already started")]
    AlreadyStarted,

    #[error("Scheduler is not started")]
    NotStarted,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
