//! Bounded fan-out of independent async jobs.
//!
//! A [`JobPool`] is transient: it is created for one request or one sweep
//! pass, sized to that fan-out, and drained with [`JobPool::wait`]. Worker
//! count is enforced with a semaphore; once `queue_capacity` jobs are pending,
//! [`JobPool::submit`] waits for one to finish before accepting another.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("job panicked: {0}")]
    Panicked(String),
    #[error("timed out after {0:?} waiting for outstanding jobs")]
    Timeout(Duration),
    #[error("job failed: {0}")]
    Job(String),
}

/// Worker count and queue capacity of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSize {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl PoolSize {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            queue_capacity: queue_capacity.max(workers),
        }
    }

    /// One worker per item, capped at `max_workers`
    pub fn for_items(items: usize, max_workers: usize, queue_factor: usize) -> Self {
        let workers = items.clamp(1, max_workers.max(1));
        Self::new(workers, workers.saturating_mul(queue_factor.max(1)))
    }
}

pub struct JobPool {
    name: &'static str,
    size: PoolSize,
    workers: Arc<Semaphore>,
    jobs: JoinSet<Result<(), PoolError>>,
    cancel: CancellationToken,
    skipped: Arc<AtomicUsize>,
    first_error: Option<PoolError>,
}

impl JobPool {
    pub fn new(name: &'static str, size: PoolSize) -> Self {
        Self::with_cancellation(name, size, CancellationToken::new())
    }

    /// Pool whose queued jobs are skipped once `cancel` fires. Jobs already
    /// executing run to completion.
    pub fn with_cancellation(name: &'static str, size: PoolSize, cancel: CancellationToken) -> Self {
        Self {
            name,
            size,
            workers: Arc::new(Semaphore::new(size.workers)),
            jobs: JoinSet::new(),
            cancel,
            skipped: Arc::new(AtomicUsize::new(0)),
            first_error: None,
        }
    }

    pub fn size(&self) -> PoolSize {
        self.size
    }

    /// Jobs skipped because the pool was cancelled before they started
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn submit<F>(&mut self, job: F)
    where
        F: Future<Output = Result<(), PoolError>> + Send + 'static,
    {
        while self.jobs.len() >= self.size.queue_capacity {
            match self.jobs.join_next().await {
                Some(result) => self.record(result),
                None => break,
            }
        }

        let workers = self.workers.clone();
        let cancel = self.cancel.clone();
        let skipped = self.skipped.clone();
        self.jobs.spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                return Ok(());
            };
            if cancel.is_cancelled() {
                skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            job.await
        });
    }

    /// Wait for every submitted job, returning the first job-level error
    pub async fn wait(&mut self) -> Result<(), PoolError> {
        while let Some(result) = self.jobs.join_next().await {
            self.record(result);
        }

        if self.skipped() > 0 {
            debug!(pool = self.name, skipped = self.skipped(), "Cancelled jobs were skipped");
        }

        match self.first_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// [`JobPool::wait`] bounded by `deadline`
    pub async fn wait_with_deadline(&mut self, deadline: Duration) -> Result<(), PoolError> {
        match tokio::time::timeout(deadline, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(PoolError::Timeout(deadline)),
        }
    }

    fn record(&mut self, result: Result<Result<(), PoolError>, JoinError>) {
        let err = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(pool = self.name, %message, "Job panicked");
                PoolError::Panicked(message)
            }
            Err(_) => return,
        };

        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
