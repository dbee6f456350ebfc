use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::warn;

use cadence_core::config::{
    SchedulerConfig, WorkerPoolConfig, DEFAULT_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS,
};

use crate::{
    clock::{Clock, SystemClock},
    engine::{Scheduler, Settings},
    id::{RunIdGenerator, UuidRunIdGenerator},
    pool::{BlockingPool, BoundedPool, WorkerPool},
    strategy::{AlwaysContinue, NeverRetry, RetryStrategy, StopStrategy},
    task::Task,
};

/// Configures a [`Scheduler`]. Anything left unset gets its default:
/// 1 s polling, UUIDv7 run ids, [`AlwaysContinue`], [`NeverRetry`],
/// [`BlockingPool`] and the system clock.
pub struct SchedulerBuilder<T: Task> {
    poll_interval: StdDuration,
    retry_delay: Option<StdDuration>,
    exclusive_runs: bool,
    clock: Option<Arc<dyn Clock>>,
    run_ids: Option<Arc<dyn RunIdGenerator<T>>>,
    stop_strategy: Option<Arc<dyn StopStrategy<T>>>,
    retry_strategy: Option<Arc<dyn RetryStrategy<T>>>,
    pool: Option<Arc<dyn WorkerPool>>,
}

impl<T: Task> SchedulerBuilder<T> {
    pub fn new() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            retry_delay: None,
            exclusive_runs: false,
            clock: None,
            run_ids: None,
            stop_strategy: None,
            retry_strategy: None,
            pool: None,
        }
    }

    /// Apply every setting from a loaded config section.
    pub fn with_config(mut self, config: &SchedulerConfig) -> Self {
        self = self.with_polling_interval(config.poll_interval());
        self.retry_delay = config.retry_delay();
        self.exclusive_runs = config.exclusive_runs;
        let pool: Arc<dyn WorkerPool> = match config.worker_pool {
            WorkerPoolConfig::Unbounded => Arc::new(BlockingPool),
            WorkerPoolConfig::Bounded { max_workers } => Arc::new(BoundedPool::new(max_workers)),
        };
        self.pool = Some(pool);
        self
    }

    /// Tick period, and the smallest delay any run can be scheduled with.
    /// Zero falls back to the default; more than a day is capped to a day.
    pub fn with_polling_interval(mut self, interval: StdDuration) -> Self {
        let max = StdDuration::from_millis(MAX_POLL_INTERVAL_MS);
        self.poll_interval = if interval.is_zero() {
            default_poll_interval()
        } else if interval > max {
            warn!(
                requested_ms = interval.as_millis() as u64,
                max_ms = MAX_POLL_INTERVAL_MS,
                "polling interval capped"
            );
            max
        } else {
            interval
        };
        self
    }

    /// Delay before a retry approved by the retry strategy. Never shorter
    /// than the polling interval.
    pub fn with_retry_delay(mut self, delay: StdDuration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn with_exclusive_runs(mut self, exclusive: bool) -> Self {
        self.exclusive_runs = exclusive;
        self
    }

    pub fn with_clock<C: Clock>(mut self, clock: Arc<C>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_run_id_generator(mut self, generator: impl RunIdGenerator<T> + 'static) -> Self {
        self.run_ids = Some(Arc::new(generator));
        self
    }

    pub fn with_stop_strategy(mut self, strategy: impl StopStrategy<T> + 'static) -> Self {
        self.stop_strategy = Some(Arc::new(strategy));
        self
    }

    pub fn with_retry_strategy(mut self, strategy: impl RetryStrategy<T> + 'static) -> Self {
        self.retry_strategy = Some(Arc::new(strategy));
        self
    }

    pub fn with_worker_pool(mut self, pool: impl WorkerPool) -> Self {
        self.pool = Some(Arc::new(pool));
        self
    }

    pub fn build(self) -> Scheduler<T> {
        let floor = to_signed(self.poll_interval);
        let retry_delay = self
            .retry_delay
            .map(to_signed)
            .map_or(floor, |delay| delay.max(floor));

        Scheduler::from_settings(Settings {
            poll_interval: self.poll_interval,
            floor,
            retry_delay,
            exclusive_runs: self.exclusive_runs,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            run_ids: self
                .run_ids
                .unwrap_or_else(|| Arc::new(UuidRunIdGenerator)),
            stop_strategy: self
                .stop_strategy
                .unwrap_or_else(|| Arc::new(AlwaysContinue)),
            retry_strategy: self
                .retry_strategy
                .unwrap_or_else(|| Arc::new(NeverRetry)),
            pool: self.pool.unwrap_or_else(|| Arc::new(BlockingPool)),
        })
    }
}

impl<T: Task> Default for SchedulerBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn default_poll_interval() -> StdDuration {
    StdDuration::from_millis(DEFAULT_POLL_INTERVAL_MS)
}

/// Saturates at the largest chrono duration. The poll interval is capped well
/// below it, so only a retry delay can saturate; targets that overflow are
/// refused when scheduled.
fn to_signed(d: StdDuration) -> Duration {
    Duration::from_std(d).unwrap_or_else(|_| Duration::milliseconds(i64::MAX))
}
