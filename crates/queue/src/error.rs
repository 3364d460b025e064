//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The receiving worker pool is gone.
    #[error("job queue is closed")]
    Closed,

    /// A handler reported failure for a job.
    #[error("job {execution_id} failed: {message}")]
    JobFailed {
        execution_id: uuid::Uuid,
        message: String,
    },
}
