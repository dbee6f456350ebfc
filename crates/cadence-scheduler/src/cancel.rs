use dashmap::DashSet;

use cadence_core::TaskId;

/// Task ids marked for deletion.
///
/// An entry is a one-shot intent: whichever interception point sees it first
/// (the worker before running, or the completion handler after) consumes it.
#[derive(Debug, Default)]
pub(crate) struct CancelSet {
    ids: DashSet<TaskId>,
}

impl CancelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the id was already marked.
    pub fn mark(&self, id: TaskId) -> bool {
        self.ids.insert(id)
    }

    /// Remove the mark. Only one caller observes `true` per mark.
    pub fn consume(&self, id: &TaskId) -> bool {
        self.ids.remove(id).is_some()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn clear(&self) {
        self.ids.clear();
    }
}
