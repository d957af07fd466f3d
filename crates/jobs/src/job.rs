//! Job definitions and the producer-facing client interface.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::JobState;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a new random job id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a job run failed.
///
/// Any error converts into a failure with `?`; its type name becomes the
/// exception type and its source chain the stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub exception_type: String,
    pub message: String,
    pub stack_trace: Vec<String>,
}

impl JobFailure {
    pub fn new(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception_type: exception_type.into(),
            message: message.into(),
            stack_trace: Vec::new(),
        }
    }

    pub(crate) fn panic(message: String) -> Self {
        Self::new("panic", message)
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.exception_type, self.message)
    }
}

impl<E> From<E> for JobFailure
where
    E: StdError + 'static,
{
    fn from(error: E) -> Self {
        let mut stack_trace = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            stack_trace.push(cause.to_string());
            source = cause.source();
        }
        Self {
            exception_type: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            stack_trace,
        }
    }
}

/// A unit of background work.
///
/// `job_type`, `method` and `arguments` describe the job for logs and
/// failure records; `run` does the work.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Name of the job's type, e.g. `"CapturePaymentJob"`.
    fn job_type(&self) -> &'static str;

    /// Name of the operation the job performs.
    fn method(&self) -> &'static str {
        "run"
    }

    /// The job's arguments as JSON.
    fn arguments(&self) -> serde_json::Value;

    async fn run(&self) -> Result<(), JobFailure>;
}

/// Description of a job as tracked by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: String,
    pub method: String,
    pub arguments: serde_json::Value,
    pub state: JobState,
    /// The job this continuation waits for.
    pub parent_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
    /// When a delayed job becomes ready.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl JobRecord {
    pub(crate) fn describe(id: JobId, job: &dyn Job, state: JobState) -> Self {
        Self {
            id,
            job_type: job.job_type().to_string(),
            method: job.method().to_string(),
            arguments: job.arguments(),
            state,
            parent_id: None,
            created_at: Utc::now(),
            scheduled_for: None,
            started_at: None,
            finished_at: None,
            last_error: None,
        }
    }
}

/// Producer-side interface of a job scheduler.
pub trait JobClient: Send + Sync {
    /// Queues `job` to run as soon as a worker is free.
    fn enqueue(&self, job: Box<dyn Job>) -> JobId;

    /// Queues `job` to run once `delay` has elapsed.
    fn schedule(&self, job: Box<dyn Job>, delay: Duration) -> JobId;

    /// Registers `job` to run only after `parent` succeeds.
    ///
    /// Returns `None` when the parent is unknown, deleted, or already purged
    /// after its retention window.
    fn continue_job_with(&self, parent: JobId, job: Box<dyn Job>) -> Option<JobId>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("gateway unreachable")]
    struct Transport;

    #[derive(Debug, thiserror::Error)]
    #[error("capture failed")]
    struct Capture(#[source] Transport);

    #[test]
    fn test_failure_from_error_keeps_chain() {
        let failure = JobFailure::from(Capture(Transport));
        assert!(failure.exception_type.ends_with("Capture"));
        assert_eq!(failure.message, "capture failed");
        assert_eq!(failure.stack_trace, vec!["gateway unreachable".to_string()]);
        assert_eq!(
            failure.to_string(),
            format!("{}: capture failed", failure.exception_type)
        );
    }

    #[test]
    fn test_job_id_serializes_as_uuid() {
        let id = JobId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
