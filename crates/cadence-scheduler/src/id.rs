use chrono::{DateTime, Utc};

use cadence_core::RunId;

use crate::task::Task;

/// Produces the id of a new run. Must be unique per call.
pub trait RunIdGenerator<T: Task>: Send + Sync {
    fn generate_id(&self, task: &T, target_execution_time: DateTime<Utc>) -> RunId;
}

/// Random UUIDs. Version 7, so the ids of one series sort in schedule order.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidRunIdGenerator;

impl<T: Task> RunIdGenerator<T> for UuidRunIdGenerator {
    fn generate_id(&self, _task: &T, _target_execution_time: DateTime<Utc>) -> RunId {
        RunId::new()
    }
}
