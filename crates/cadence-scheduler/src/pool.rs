//! Worker pools that execute task runs off the poller.

use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// A unit of work handed to a pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Why a pool refused a job. The job is dropped without running.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// All workers are busy.
    #[error("Worker pool saturated ({limit} workers busy)")]
    Saturated { limit: usize },

    /// Submission happened outside a Tokio runtime.
    #[error("No Tokio runtime available for task execution")]
    NoRuntime,
}

/// Executes jobs on worker threads.
///
/// `submit` must not block. A pool that cannot take a job right now returns an
/// error; the engine keeps the run and offers it again on the next tick.
pub trait WorkerPool: Send + Sync + 'static {
    fn submit(&self, job: Job) -> Result<(), DispatchError>;
}

impl<P: WorkerPool> WorkerPool for Arc<P> {
    fn submit(&self, job: Job) -> Result<(), DispatchError> {
        (**self).submit(job)
    }
}

/// Growable pool on top of Tokio's blocking threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockingPool;

impl WorkerPool for BlockingPool {
    fn submit(&self, job: Job) -> Result<(), DispatchError> {
        let runtime = Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
        runtime.spawn_blocking(job);
        Ok(())
    }
}

/// At most `limit` jobs run at once; further submissions are rejected.
#[derive(Debug, Clone)]
pub struct BoundedPool {
    limit: usize,
    permits: Arc<Semaphore>,
}

impl BoundedPool {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            permits: Arc::new(Semaphore::new(limit)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Jobs currently holding a worker.
    pub fn busy(&self) -> usize {
        self.limit - self.permits.available_permits()
    }
}

impl WorkerPool for BoundedPool {
    fn submit(&self, job: Job) -> Result<(), DispatchError> {
        let runtime = Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| DispatchError::Saturated { limit: self.limit })?;
        runtime.spawn_blocking(move || {
            // Released when the job returns or unwinds.
            let _permit = permit;
            job();
        });
        Ok(())
    }
}
