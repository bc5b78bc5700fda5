//! Bounded worker pool for incoming calls.
//!
//! Jobs are queued without blocking the caller and started strictly in
//! submission order, at most `size` at a time. Starting in order matters:
//! a job waiting for its endpoint ticket is never stuck behind a later
//! ticket holding the last permit.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{Semaphore, mpsc};

/// A fixed-size pool of concurrently running jobs.
pub(crate) struct WorkerPool {
    jobs: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl WorkerPool {
    /// Starts the dispatcher. Must be called inside a Tokio runtime.
    pub(crate) fn new(size: usize) -> Self {
        let (jobs, queue) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(queue, Arc::new(Semaphore::new(size))));
        Self { jobs }
    }

    /// Queues a job.
    pub(crate) fn execute<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.jobs.send(Box::pin(job)).is_err() {
            tracing::warn!("worker pool stopped, dropping job");
        }
    }
}

async fn dispatch(
    mut queue: mpsc::UnboundedReceiver<BoxFuture<'static, ()>>,
    permits: Arc<Semaphore>,
) {
    while let Some(job) = queue.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        tokio::spawn(async move {
            job.await;
            drop(permit);
        });
    }
    tracing::debug!("worker pool dispatcher stopped");
}
