//! `cadence-scheduler` is an in-process scheduler for self-timed recurring tasks.
//!
//! # Overview
//!
//! A [`Task`] reports its own delay to the next run. [`Scheduler::schedule`]
//! turns that delay into a [`TaskRun`] in the ready queue; a poller on the
//! Tokio runtime drains every due run on each tick and hands it to a
//! [`WorkerPool`]. When a run finishes, completion subscribers see it first,
//! then the engine consults the strategies and schedules the next run with
//! the observed drift subtracted, so lateness does not accumulate.
//!
//! ```text
//! schedule ─► ReadyQueue ─► poller tick ─► WorkerPool ─► Task::run
//!                 ▲                                         │
//!                 └──── reschedule ◄── strategies ◄── completion event
//! ```
//!
//! # Cancellation
//!
//! [`Scheduler::delete`] marks a task id. The mark is checked once before a
//! run executes and once after it completes; whichever check sees it first
//! removes it and ends the series.
//!
//! # Strategies
//!
//! | Hook              | Consulted            | Default            |
//! |-------------------|----------------------|--------------------|
//! | [`StopStrategy`]  | unless retried       | [`AlwaysContinue`] |
//! | [`RetryStrategy`] | after a failed run   | [`NeverRetry`]     |
//! | [`RunIdGenerator`]| on every schedule    | [`UuidRunIdGenerator`] |

pub mod builder;
mod cancel;
pub mod clock;
pub mod engine;
pub mod error;
pub mod events;
pub mod id;
pub mod pool;
mod queue;
pub mod strategy;
pub mod task;
pub mod types;

pub use builder::SchedulerBuilder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::Scheduler;
pub use error::{Result, SchedulerError};
pub use events::SubscriptionId;
pub use id::{RunIdGenerator, UuidRunIdGenerator};
pub use pool::{BlockingPool, BoundedPool, DispatchError, Job, WorkerPool};
pub use strategy::{AlwaysContinue, MaxRuns, NeverRetry, RetryStrategy, StopStrategy};
pub use task::{error_message, Task};
pub use types::{RunOutcome, RunStatus, TaskRun};

pub use cadence_core::{RunId, TaskId};
