use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::task::Task;
use crate::types::TaskRun;

/// Pending runs ordered by target execution time.
///
/// Keyed by `(target, insertion sequence)` so runs due at the same instant can
/// coexist; their relative order carries no meaning. The lock is held only for
/// a single map operation, never while a task runs.
pub(crate) struct ReadyQueue<T: Task> {
    entries: Mutex<BTreeMap<(DateTime<Utc>, u64), TaskRun<T>>>,
    seq: AtomicU64,
}

impl<T: Task> ReadyQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn push(&self, run: TaskRun<T>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .insert((run.target_execution_time(), seq), run);
    }

    /// Remove and return the earliest run if it is due at `now`.
    ///
    /// Check and removal happen under one lock, so two concurrent callers can
    /// never take the same run.
    pub fn pop_due(&self, now: DateTime<Utc>) -> Option<TaskRun<T>> {
        let mut entries = self.lock();
        let first = entries.first_entry()?;
        if first.key().0 > now {
            return None;
        }
        Some(first.remove())
    }

    /// Target time of the earliest pending run.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.lock().keys().next().map(|(at, _)| *at)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<(DateTime<Utc>, u64), TaskRun<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
