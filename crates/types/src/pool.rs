//! Bounded worker pool shared by a component for its whole lifetime.
//!
//! Spawned jobs are accepted immediately and queue on a semaphore, so the
//! caller never waits for a free worker; at most `size` jobs run at once.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// A named, fixed-size pool of concurrently running async jobs.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// Creates a pool running at most `size` jobs at once (minimum 1).
    #[must_use]
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name,
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of idle workers right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Schedules `job` on the pool and returns without waiting for a worker.
    pub fn spawn<F>(&self, job: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let name = self.name;
        tokio::spawn(async move {
            // The semaphore is never closed, so acquisition only fails on a bug.
            let _permit = permits.acquire_owned().await;
            tracing::trace!(pool = name, "worker acquired");
            job.await
        })
    }
}
