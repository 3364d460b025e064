//! `queue` crate: in-process job queue feeding a bounded worker pool.
//!
//! Producers hold a cheap, cloneable [`JobQueue`]; a single [`WorkerPool`]
//! drains the receiving end and runs at most `concurrency` jobs at a time,
//! each on its own tokio task.

pub mod error;
pub mod job;
pub mod worker;

pub use error::QueueError;
pub use job::{Job, JobKind};
pub use worker::{JobHandler, WorkerPool};

use tokio::sync::mpsc;
use tracing::debug;

/// Sending half of the queue.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    /// Create a queue and the receiver a [`WorkerPool`] consumes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a job for the worker pool.
    ///
    /// # Errors
    /// [`QueueError::Closed`] once the worker pool has shut down.
    pub fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        debug!(execution_id = %job.execution_id, kind = ?job.kind, "enqueue job");
        self.tx.send(job).map_err(|_| QueueError::Closed)
    }
}
