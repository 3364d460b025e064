//! Bounded worker pool.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, instrument};

use crate::{Job, QueueError};

/// Something that knows how to process one job.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: Job) -> Result<(), QueueError>;
}

/// Drains a job receiver with at most `concurrency` jobs in flight.
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self { concurrency: concurrency.max(1) }
    }

    /// Run until every [`crate::JobQueue`] sender is dropped, then wait for
    /// in-flight jobs to finish.
    #[instrument(skip_all, fields(concurrency = self.concurrency))]
    pub async fn run<H: JobHandler>(self, mut rx: mpsc::UnboundedReceiver<Job>, handler: Arc<H>) {
        info!("worker pool started");
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();

        while let Some(job) = rx.recv().await {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let handler = handler.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                let execution_id = job.execution_id;
                if let Err(err) = handler.handle(job).await {
                    error!(%execution_id, error = %err, "job failed");
                }
            });
            // Reap finished jobs so the set does not grow unbounded.
            while in_flight.try_join_next().is_some() {}
        }

        while in_flight.join_next().await.is_some() {}
        info!("worker pool stopped");
    }
}
