use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashSet;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use cadence_core::{RunId, TaskId};

use crate::{
    builder::SchedulerBuilder,
    cancel::CancelSet,
    clock::Clock,
    error::{Result, SchedulerError},
    events::{CompletionSignal, SubscriptionId},
    id::RunIdGenerator,
    pool::{Job, WorkerPool},
    queue::ReadyQueue,
    strategy::{RetryStrategy, StopStrategy},
    task::{error_message, Task},
    types::TaskRun,
};

/// In-process recurring task scheduler.
///
/// Cheap to clone; every clone drives the same engine. Runs are polled on a
/// Tokio task, executed on the configured [`WorkerPool`] and rescheduled from
/// the worker thread once subscribers have seen the completion.
pub struct Scheduler<T: Task> {
    pub(crate) inner: Arc<Inner<T>>,
}

impl<T: Task> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Everything the builder resolves before the engine is assembled.
pub(crate) struct Settings<T: Task> {
    pub poll_interval: StdDuration,
    pub floor: Duration,
    pub retry_delay: Duration,
    pub exclusive_runs: bool,
    pub clock: Arc<dyn Clock>,
    pub run_ids: Arc<dyn RunIdGenerator<T>>,
    pub stop_strategy: Arc<dyn StopStrategy<T>>,
    pub retry_strategy: Arc<dyn RetryStrategy<T>>,
    pub pool: Arc<dyn WorkerPool>,
}

pub(crate) struct Inner<T: Task> {
    poll_interval: StdDuration,
    /// Smallest delay a run may be scheduled with. Equal to the poll interval.
    floor: Duration,
    retry_delay: Duration,
    exclusive_runs: bool,
    clock: Arc<dyn Clock>,
    run_ids: Arc<dyn RunIdGenerator<T>>,
    stop_strategy: Arc<dyn StopStrategy<T>>,
    retry_strategy: Arc<dyn RetryStrategy<T>>,
    pool: Arc<dyn WorkerPool>,
    queue: ReadyQueue<T>,
    deleted: CancelSet,
    /// Task ids with a run on a worker. Only maintained with `exclusive_runs`.
    in_flight: DashSet<TaskId>,
    completed: CompletionSignal<T>,
    started: AtomicBool,
    /// Shutdown switch of the running poller, if any.
    poller: Mutex<Option<watch::Sender<bool>>>,
}

impl<T: Task> Scheduler<T> {
    pub fn builder() -> SchedulerBuilder<T> {
        SchedulerBuilder::new()
    }

    pub(crate) fn from_settings(settings: Settings<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                poll_interval: settings.poll_interval,
                floor: settings.floor,
                retry_delay: settings.retry_delay,
                exclusive_runs: settings.exclusive_runs,
                clock: settings.clock,
                run_ids: settings.run_ids,
                stop_strategy: settings.stop_strategy,
                retry_strategy: settings.retry_strategy,
                pool: settings.pool,
                queue: ReadyQueue::new(),
                deleted: CancelSet::new(),
                in_flight: DashSet::new(),
                completed: CompletionSignal::new(),
                started: AtomicBool::new(false),
                poller: Mutex::new(None),
            }),
        }
    }

    /// Reset state and begin polling. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        let mut poller = self.inner.lock_poller();
        if poller.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }

        self.inner.clear();
        self.inner.started.store(true, Ordering::SeqCst);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        runtime.spawn(run_poller(
            Arc::downgrade(&self.inner),
            self.inner.poll_interval,
            shutdown_rx,
        ));
        *poller = Some(shutdown_tx);

        info!(
            poll_interval_ms = self.inner.poll_interval.as_millis() as u64,
            "started task scheduler"
        );
        Ok(())
    }

    /// Stop polling and drop all pending runs and deletion marks.
    ///
    /// Runs already on a worker are not interrupted. They still publish their
    /// completion event, but nothing further is scheduled.
    pub fn stop(&self) -> Result<()> {
        let shutdown = self
            .inner
            .lock_poller()
            .take()
            .ok_or(SchedulerError::NotStarted)?;
        self.inner.started.store(false, Ordering::SeqCst);
        // The poller may already be gone if the runtime shut down.
        let _ = shutdown.send(true);
        self.inner.clear();
        info!("task scheduler shut down");
        Ok(())
    }

    /// Empty the ready queue and forget pending deletions.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Schedule the next run of `task`, measuring its delay from now.
    ///
    /// Returns `None` if the scheduler is not started or the task asked for no
    /// further runs.
    pub fn schedule(&self, task: impl Into<Arc<T>>) -> Option<RunId> {
        let now = self.inner.clock.now();
        self.inner.schedule(task.into(), now)
    }

    /// Like [`Scheduler::schedule`], measuring the delay from `reference`.
    pub fn schedule_at(&self, task: impl Into<Arc<T>>, reference: DateTime<Utc>) -> Option<RunId> {
        self.inner.schedule(task.into(), reference)
    }

    /// Stop the series of `task_id`.
    ///
    /// The next run about to execute is skipped, or, if one is already
    /// executing, it is not rescheduled. Deleting an already-marked id is a
    /// no-op.
    pub fn delete(&self, task_id: impl Into<TaskId>) {
        let task_id = task_id.into();
        if self.inner.deleted.mark(task_id.clone()) {
            debug!(task_id = %task_id, "task marked for deletion");
        } else {
            trace!(task_id = %task_id, "task already marked for deletion");
        }
    }

    /// Subscribe to completion events.
    ///
    /// The handler runs synchronously on the worker thread, before the engine
    /// decides on rescheduling. Keep it short.
    pub fn on_task_completed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&TaskRun<T>) + Send + Sync + 'static,
    {
        self.inner.completed.connect(handler)
    }

    pub fn remove_subscriber(&self, id: SubscriptionId) {
        self.inner.completed.disconnect(id);
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Number of runs waiting in the ready queue.
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Target time of the earliest waiting run.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.inner.queue.next_due()
    }

    pub fn poll_interval(&self) -> StdDuration {
        self.inner.poll_interval
    }

    #[cfg(test)]
    pub(crate) fn floor(&self) -> Duration {
        self.inner.floor
    }

    #[cfg(test)]
    pub(crate) fn retry_delay(&self) -> Duration {
        self.inner.retry_delay
    }

    #[cfg(test)]
    pub(crate) fn exclusive_runs(&self) -> bool {
        self.inner.exclusive_runs
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &Arc<dyn WorkerPool> {
        &self.inner.pool
    }
}

impl<T: Task> Inner<T> {
    fn lock_poller(&self) -> MutexGuard<'_, Option<watch::Sender<bool>>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear(&self) {
        self.queue.clear();
        self.deleted.clear();
        info!("scheduler queue purged");
    }

    fn schedule(&self, task: Arc<T>, reference: DateTime<Utc>) -> Option<RunId> {
        let task_id = task.id();
        let requested = task.delay_to_next_run(reference);
        if requested <= Duration::zero() {
            info!(
                task_id = %task_id,
                delay_ms = requested.num_milliseconds(),
                "non-positive delay, no further runs will be scheduled"
            );
            return None;
        }

        let delay = if requested < self.floor {
            warn!(
                task_id = %task_id,
                delay_ms = requested.num_milliseconds(),
                floor_ms = self.floor.num_milliseconds(),
                "provided delay readjusted to lowest possible delay"
            );
            self.floor
        } else {
            requested
        };

        let Some(target) = reference.checked_add_signed(delay) else {
            warn!(task_id = %task_id, delay_ms = delay.num_milliseconds(), "delay out of range, schedule refused");
            return None;
        };
        let run_id = self.enqueue(task, target)?;
        debug!(
            task_id = %task_id,
            run_id = %run_id,
            delay_ms = delay.num_milliseconds(),
            target = %target,
            reference = %reference,
            "scheduled task"
        );
        Some(run_id)
    }

    fn enqueue(&self, task: Arc<T>, target: DateTime<Utc>) -> Option<RunId> {
        if !self.started.load(Ordering::SeqCst) {
            warn!(task_id = %task.id(), "scheduler not started, schedule refused");
            return None;
        }
        let run_id = self.run_ids.generate_id(&task, target);
        self.queue.push(TaskRun::new(run_id.clone(), task, target));
        Some(run_id)
    }

    /// Hand every run due at `now` to the worker pool.
    pub(crate) fn process_due(self: &Arc<Self>, now: DateTime<Utc>) {
        let mut submitted = 0usize;
        let mut deferred = Vec::new();

        while let Some(run) = self.queue.pop_due(now) {
            let task_id = run.task_id();
            if self.exclusive_runs && !self.in_flight.insert(task_id.clone()) {
                trace!(
                    task_id = %task_id,
                    run_id = %run.run_id(),
                    "previous run still in flight, deferring"
                );
                deferred.push(run);
                continue;
            }
            match self.dispatch(run) {
                Ok(()) => submitted += 1,
                Err(run) => {
                    self.release(&task_id);
                    // Still due, so keep it for the next tick instead of spinning on it now.
                    self.queue.push(run);
                    break;
                }
            }
        }

        for run in deferred {
            self.queue.push(run);
        }
        if submitted == 0 {
            trace!("nothing to do now, will try again later");
        }
    }

    /// Submit one run. A rejected run is handed back to the caller.
    fn dispatch(self: &Arc<Self>, run: TaskRun<T>) -> std::result::Result<(), TaskRun<T>> {
        let task_id = run.task_id();
        let run_id = run.run_id().clone();

        let slot = Arc::new(Mutex::new(Some(run)));
        let job_slot = Arc::clone(&slot);
        let inner = Arc::clone(self);
        let job: Job = Box::new(move || {
            if let Some(run) = take(&job_slot) {
                inner.execute(run);
            }
        });

        match self.pool.submit(job) {
            Ok(()) => {
                trace!(task_id = %task_id, run_id = %run_id, "submitted for execution");
                Ok(())
            }
            Err(e) => {
                warn!(
                    task_id = %task_id,
                    run_id = %run_id,
                    error = %e,
                    "dispatch rejected, run re-queued for the next poll"
                );
                take(&slot).map_or(Ok(()), Err)
            }
        }
    }

    /// Worker side: run the task, publish the outcome, reschedule.
    pub(crate) fn execute(&self, mut run: TaskRun<T>) {
        let task_id = run.task_id();
        // Deleted while waiting in the queue.
        if self.deleted.consume(&task_id) {
            debug!(
                task_id = %task_id,
                run_id = %run.run_id(),
                "task has already been deleted, run will be ignored"
            );
            self.release(&task_id);
            return;
        }

        let now = self.clock.now();
        run.mark_started(now);
        let task = Arc::clone(run.task());
        let result = panic::catch_unwind(AssertUnwindSafe(|| task.run(now, &run)))
            .unwrap_or_else(|payload| {
                Err(anyhow::anyhow!("task panicked: {}", panic_message(payload.as_ref())))
            });
        run.complete(result);

        self.completed.dispatch(&run);
        self.release(&task_id);
        self.handle_completion(run);
    }

    fn handle_completion(&self, run: TaskRun<T>) {
        let task_id = run.task_id();
        match run.failure() {
            None => info!(task_id = %task_id, run_id = %run.run_id(), "task run is now complete"),
            Some(e) => warn!(
                task_id = %task_id,
                run_id = %run.run_id(),
                error = %error_message(e),
                "task run is now complete with error"
            ),
        }

        // Deleted while executing.
        if self.deleted.consume(&task_id) {
            debug!(task_id = %task_id, "task has already been deleted, no further scheduling");
            return;
        }

        let now = self.clock.now();
        if run.is_failed() && self.retry_strategy.should_retry(&run) {
            match now.checked_add_signed(self.retry_delay) {
                Some(retry_at) => {
                    if let Some(retry_id) = self.enqueue(Arc::clone(run.task()), retry_at) {
                        info!(
                            task_id = %task_id,
                            run_id = %run.run_id(),
                            retry_run_id = %retry_id,
                            retry_delay_ms = self.retry_delay.num_milliseconds(),
                            "failed run will be retried"
                        );
                    }
                    return;
                }
                None => warn!(
                    task_id = %task_id,
                    retry_delay_ms = self.retry_delay.num_milliseconds(),
                    "retry delay out of range, keeping normal cadence"
                ),
            }
        }

        if !self.stop_strategy.schedule_next(&run) {
            info!(task_id = %task_id, run_id = %run.run_id(), "stop strategy ended the series");
            return;
        }

        // Measure the next delay from the intended start, not the late one.
        let drift = run.drift(now);
        debug!(
            task_id = %task_id,
            drift_ms = drift.num_milliseconds(),
            "adjusting next run for drift"
        );
        self.schedule(Arc::clone(run.task()), now - drift);
    }

    fn release(&self, task_id: &TaskId) {
        if self.exclusive_runs {
            self.in_flight.remove(task_id);
        }
    }
}

async fn run_poller<T: Task>(
    inner: Weak<Inner<T>>,
    period: StdDuration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(inner) = inner.upgrade() else {
                    debug!("scheduler dropped, poller exiting");
                    break;
                };
                let now = inner.clock.now();
                inner.process_due(now);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("poller stopped");
}

fn take<T: Task>(slot: &Mutex<Option<TaskRun<T>>>) -> Option<TaskRun<T>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
