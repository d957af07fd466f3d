//! Job scheduler error types.

use thiserror::Error;

use crate::{JobId, JobState};

/// Errors that can occur in job scheduling and failure bookkeeping.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job id is unknown to the scheduler.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// The job is not in a state that allows the requested operation.
    #[error("Job {job_id} is {state}, cannot {action}")]
    InvalidState {
        job_id: JobId,
        state: JobState,
        action: &'static str,
    },

    /// The failed-job store rejected the operation.
    #[error("Failed-job store error: {0}")]
    Store(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for job results.
pub type Result<T> = std::result::Result<T, JobError>;
