// End-to-end behaviour of a live scheduler: real clock, real worker threads,
// short delays. Timing assertions leave generous slack for loaded CI hosts.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::Context;
use cadence_scheduler::{
    error_message, BoundedPool, RunId, Scheduler, Task, TaskId, TaskRun,
};
use chrono::{DateTime, Duration, Utc};

const POLL: StdDuration = StdDuration::from_millis(100);

struct Repeating {
    index: usize,
    delay_ms: i64,
}

impl Task for Repeating {
    type Output = String;

    fn id(&self) -> TaskId {
        format!("TEST_TASK_{}", self.index).into()
    }

    fn delay_to_next_run(&self, _reference: DateTime<Utc>) -> Duration {
        Duration::milliseconds(self.delay_ms)
    }

    fn run(&self, now: DateTime<Utc>, _run: &TaskRun<Self>) -> anyhow::Result<String> {
        Ok(now.to_rfc3339())
    }
}

struct Failing {
    delay_ms: i64,
}

impl Task for Failing {
    type Output = ();

    fn id(&self) -> TaskId {
        "FAIL_TASK".into()
    }

    fn delay_to_next_run(&self, _reference: DateTime<Utc>) -> Duration {
        Duration::milliseconds(self.delay_ms)
    }

    fn run(&self, _now: DateTime<Utc>, _run: &TaskRun<Self>) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("forced failure")).context("failing task gave up")
    }
}

/// Sleeps inside `run`, tracking how many copies execute at once.
#[derive(Default)]
struct Sleepy {
    id: &'static str,
    delay_ms: i64,
    sleep_ms: u64,
    started: AtomicBool,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl Sleepy {
    fn new(id: &'static str, delay_ms: i64, sleep_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            delay_ms,
            sleep_ms,
            ..Default::default()
        })
    }
}

impl Task for Sleepy {
    type Output = RunId;

    fn id(&self) -> TaskId {
        self.id.into()
    }

    fn delay_to_next_run(&self, _reference: DateTime<Utc>) -> Duration {
        Duration::milliseconds(self.delay_ms)
    }

    fn run(&self, _now: DateTime<Utc>, run: &TaskRun<Self>) -> anyhow::Result<RunId> {
        self.started.store(true, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        std::thread::sleep(StdDuration::from_millis(self.sleep_ms));
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(run.run_id().clone())
    }
}

#[derive(Debug, Clone)]
struct Seen {
    task_id: TaskId,
    run_id: RunId,
    target: DateTime<Utc>,
    failure: Option<String>,
    has_result: bool,
}

fn record<T: Task>(scheduler: &Scheduler<T>) -> Arc<Mutex<Vec<Seen>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    scheduler.on_task_completed(move |run: &TaskRun<T>| {
        sink.lock().unwrap().push(Seen {
            task_id: run.task_id(),
            run_id: run.run_id().clone(),
            target: run.target_execution_time(),
            failure: run.failure().map(error_message),
            has_result: run.result().is_some(),
        });
    });
    seen
}

fn count(seen: &Arc<Mutex<Vec<Seen>>>) -> usize {
    seen.lock().unwrap().len()
}

async fn wait_until(timeout: StdDuration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    done()
}

async fn pause(ms: u64) {
    tokio::time::sleep(StdDuration::from_millis(ms)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn repeating_task_runs_on_cadence() {
    let scheduler = Scheduler::<Repeating>::builder().with_polling_interval(POLL).build();
    let seen = record(&scheduler);
    scheduler.start().unwrap();

    let task = Repeating {
        index: 0,
        delay_ms: 200,
    };
    assert!(scheduler.schedule(task).is_some());

    assert!(wait_until(StdDuration::from_secs(3), || count(&seen) >= 3).await);
    scheduler.stop().unwrap();

    let seen = seen.lock().unwrap().clone();
    for pair in seen.windows(2) {
        assert!(pair[0].run_id < pair[1].run_id, "run ids not increasing");
        assert!(pair[1].target - pair[0].target >= Duration::milliseconds(200));
    }
    assert!(seen.iter().all(|s| s.has_result && s.failure.is_none()));
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_task_reports_every_failure() {
    let scheduler = Scheduler::<Failing>::builder().with_polling_interval(POLL).build();
    let seen = record(&scheduler);
    scheduler.start().unwrap();
    scheduler.schedule(Failing { delay_ms: 100 });

    assert!(wait_until(StdDuration::from_secs(3), || count(&seen) >= 3).await);
    scheduler.stop().unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen.iter().all(|s| !s.has_result));
    assert!(seen
        .iter()
        .all(|s| s.failure.as_deref() == Some("forced failure")));
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_strategy_limits_runs() {
    let completed = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&completed);
    let scheduler = Scheduler::<Repeating>::builder()
        .with_polling_interval(POLL)
        .with_stop_strategy(move |_run: &TaskRun<Repeating>| c.fetch_add(1, Ordering::SeqCst) + 1 < 2)
        .build();
    let seen = record(&scheduler);
    scheduler.start().unwrap();
    scheduler.schedule(Repeating {
        index: 0,
        delay_ms: 100,
    });

    assert!(wait_until(StdDuration::from_secs(3), || count(&seen) >= 2).await);
    // Five delays later there is still no third run.
    pause(500).await;
    assert_eq!(count(&seen), 2);
    assert_eq!(scheduler.pending(), 0);
    scheduler.stop().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_before_dispatch_prevents_execution() {
    let scheduler = Scheduler::<Sleepy>::builder().with_polling_interval(POLL).build();
    let seen = record(&scheduler);
    scheduler.start().unwrap();

    let task = Sleepy::new("pending", 300, 0);
    scheduler.schedule(Arc::clone(&task));
    scheduler.delete("pending");

    pause(1_000).await;
    assert!(!task.started.load(Ordering::SeqCst));
    assert_eq!(count(&seen), 0);
    assert_eq!(scheduler.pending(), 0);
    scheduler.stop().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_while_running_stops_series() {
    let scheduler = Scheduler::<Sleepy>::builder().with_polling_interval(POLL).build();
    let seen = record(&scheduler);
    scheduler.start().unwrap();

    let task = Sleepy::new("LONG_TASK", 200, 300);
    scheduler.schedule(Arc::clone(&task));
    assert!(wait_until(StdDuration::from_secs(3), || task.started.load(Ordering::SeqCst)).await);
    scheduler.delete("LONG_TASK");

    pause(1_000).await;
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    // The in-flight run still completed normally.
    assert!(seen[0].has_result);
    assert_eq!(scheduler.pending(), 0);
    scheduler.stop().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn short_delay_is_raised_to_poll_interval() {
    let scheduler = Scheduler::<Repeating>::builder().with_polling_interval(POLL).build();
    let seen = record(&scheduler);
    scheduler.start().unwrap();
    scheduler.schedule(Repeating {
        index: 0,
        delay_ms: 1,
    });

    assert!(wait_until(StdDuration::from_secs(3), || count(&seen) >= 3).await);
    scheduler.stop().unwrap();

    let seen = seen.lock().unwrap().clone();
    for pair in seen.windows(2) {
        assert!(pair[1].target - pair[0].target >= Duration::milliseconds(100));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn many_tasks_run_independently() {
    let scheduler = Scheduler::<Repeating>::builder().with_polling_interval(POLL).build();
    let seen = record(&scheduler);
    scheduler.start().unwrap();
    for index in 0..10 {
        assert!(scheduler
            .schedule(Repeating {
                index,
                delay_ms: 200
            })
            .is_some());
    }

    let per_task = |seen: &Arc<Mutex<Vec<Seen>>>, index: usize| {
        let id = TaskId::from(format!("TEST_TASK_{index}"));
        seen.lock().unwrap().iter().filter(|s| s.task_id == id).count()
    };
    let all_ran = wait_until(StdDuration::from_secs(4), || {
        (0..10).all(|i| per_task(&seen, i) >= 3)
    })
    .await;
    scheduler.stop().unwrap();
    assert!(all_ran);
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_strategy_retries_out_of_cadence() {
    let retries = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&retries);
    let scheduler = Scheduler::<Failing>::builder()
        .with_polling_interval(POLL)
        .with_retry_delay(StdDuration::from_millis(100))
        .with_retry_strategy(move |_run: &TaskRun<Failing>| r.fetch_add(1, Ordering::SeqCst) < 2)
        .build();
    let seen = record(&scheduler);
    scheduler.start().unwrap();
    // Without retries the second run would be ten seconds away.
    scheduler.schedule_at(Failing { delay_ms: 10_000 }, Utc::now() - Duration::milliseconds(9_900));

    assert!(wait_until(StdDuration::from_secs(3), || count(&seen) >= 3).await);
    pause(500).await;
    assert_eq!(count(&seen), 3);
    // Back on the normal cadence.
    assert_eq!(scheduler.pending(), 1);
    scheduler.stop().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn saturated_pool_defers_instead_of_dropping() {
    let scheduler = Scheduler::<Sleepy>::builder()
        .with_polling_interval(POLL)
        .with_worker_pool(BoundedPool::new(1))
        .build();
    let seen = record(&scheduler);
    scheduler.start().unwrap();

    let a = Sleepy::new("a", 100, 150);
    let b = Sleepy::new("b", 100, 150);
    scheduler.schedule(Arc::clone(&a));
    scheduler.schedule(Arc::clone(&b));

    let runs_of = |id: &str| {
        let id = TaskId::from(id);
        seen.lock().unwrap().iter().filter(|s| s.task_id == id).count()
    };
    let both = wait_until(StdDuration::from_secs(4), || runs_of("a") >= 2 && runs_of("b") >= 2).await;
    scheduler.stop().unwrap();
    assert!(both);
    assert_eq!(a.max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn exclusive_runs_never_overlap() {
    let scheduler = Scheduler::<Sleepy>::builder()
        .with_polling_interval(POLL)
        .with_exclusive_runs(true)
        .build();
    let seen = record(&scheduler);
    scheduler.start().unwrap();

    let task = Sleepy::new("solo", 100, 250);
    for _ in 0..3 {
        scheduler.schedule(Arc::clone(&task));
    }

    assert!(wait_until(StdDuration::from_secs(4), || count(&seen) >= 3).await);
    scheduler.stop().unwrap();
    assert_eq!(task.max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_halts_polling() {
    let scheduler = Scheduler::<Repeating>::builder().with_polling_interval(POLL).build();
    let seen = record(&scheduler);
    scheduler.start().unwrap();
    scheduler.schedule(Repeating {
        index: 0,
        delay_ms: 100,
    });
    assert!(wait_until(StdDuration::from_secs(3), || count(&seen) >= 2).await);

    scheduler.stop().unwrap();
    let at_stop = count(&seen);
    pause(500).await;
    // At most one run may have been on a worker when stop was called.
    assert!(count(&seen) <= at_stop + 1);
    assert_eq!(scheduler.pending(), 0);
    assert!(!scheduler.is_started());
}
