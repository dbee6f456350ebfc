//! `cadence-core` holds the configuration, error and identifier types shared by the
//! scheduler engine and the runner binary.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CadenceConfig, IntervalTaskConfig, SchedulerConfig, WorkerPoolConfig};
pub use error::{CadenceError, Result};
pub use types::{RunId, TaskId};
