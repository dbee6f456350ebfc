use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error};

use crate::task::Task;
use crate::types::TaskRun;

/// Callback invoked once per completed run.
pub type CompletionHandler<T> = dyn Fn(&TaskRun<T>) + Send + Sync;

/// Handle returned by [`CompletionSignal::connect`], used to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Observer list for completion events.
///
/// Dispatch is synchronous on the worker thread that ran the task, in
/// registration order. Subscribers hold that worker for as long as they run.
pub struct CompletionSignal<T: Task> {
    subscribers: RwLock<Vec<(SubscriptionId, Arc<CompletionHandler<T>>)>>,
    next_id: AtomicU64,
}

impl<T: Task> CompletionSignal<T> {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn connect<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&TaskRun<T>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        debug!(subscription = id.0, "completion subscriber connected");
        id
    }

    /// Silent no-op for an unknown id.
    pub fn disconnect(&self, id: SubscriptionId) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        if subscribers.len() < before {
            debug!(subscription = id.0, "completion subscriber disconnected");
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every subscriber. A panicking subscriber is logged and skipped;
    /// it does not take the worker thread or the remaining subscribers down.
    pub fn dispatch(&self, run: &TaskRun<T>) {
        // Snapshot so subscribers may connect/disconnect from inside a callback.
        let handlers: Vec<Arc<CompletionHandler<T>>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for handler in handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(run))).is_err() {
                error!(
                    task_id = %run.task_id(),
                    run_id = %run.run_id(),
                    "completion subscriber panicked"
                );
            }
        }
    }
}

impl<T: Task> Default for CompletionSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}
