//! Hooks observing job execution, and the failure-recording filter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{FailedJobRecord, FailedJobStore, JobFailure, JobRecord, JobState};

/// What a filter sees after a job run.
#[derive(Debug, Clone)]
pub struct PerformedContext {
    /// The job as it was when the run started.
    pub job: JobRecord,
    pub outcome: Result<(), JobFailure>,
    pub duration: Duration,
}

/// A state transition applied by a worker.
#[derive(Debug, Clone)]
pub struct StateChange {
    /// The job after the transition.
    pub job: JobRecord,
    pub old_state: JobState,
    pub new_state: JobState,
    pub failure: Option<JobFailure>,
}

/// Observes job execution. Filters run in registry order after every run.
#[async_trait]
pub trait JobFilter: Send + Sync {
    /// Called after every run, successful or not.
    async fn on_performed(&self, _context: &PerformedContext) {}

    /// Called after a worker moves a job to its post-run state.
    async fn on_state_changed(&self, _change: &StateChange) {}
}

struct FilterEntry {
    order: i32,
    filter: Arc<dyn JobFilter>,
}

/// Explicit, ordered list of job filters.
///
/// Lower `order` runs first; filters with equal order keep registration order.
#[derive(Default)]
pub struct FilterRegistry {
    entries: Vec<FilterEntry>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, order: i32, filter: Arc<dyn JobFilter>) -> Self {
        self.entries.push(FilterEntry { order, filter });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorts by order and returns the filters.
    pub(crate) fn into_sorted(mut self) -> Vec<Arc<dyn JobFilter>> {
        self.entries.sort_by_key(|e| e.order);
        self.entries.into_iter().map(|e| e.filter).collect()
    }
}

/// Logs every failed run and records jobs that move into `Failed`.
pub struct JobErrorHandler {
    store: Arc<dyn FailedJobStore>,
}

impl JobErrorHandler {
    pub fn new(store: Arc<dyn FailedJobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobFilter for JobErrorHandler {
    async fn on_performed(&self, context: &PerformedContext) {
        if let Err(failure) = &context.outcome {
            let job = &context.job;
            tracing::error!(
                job_id = %job.id,
                job_type = %job.job_type,
                method = %job.method,
                arguments = %job.arguments,
                exception_type = %failure.exception_type,
                exception_message = %failure.message,
                stack_trace = ?failure.stack_trace,
                failed_at = %chrono::Utc::now(),
                "background job failed"
            );
        }
    }

    async fn on_state_changed(&self, change: &StateChange) {
        if change.new_state != JobState::Failed {
            return;
        }
        let Some(failure) = &change.failure else {
            return;
        };

        let record = FailedJobRecord::new(&change.job, failure);
        tracing::error!(
            job_id = %record.job_id,
            job_type = %record.job_type,
            method = %record.method,
            arguments = %record.arguments,
            exception_type = %record.exception_type,
            exception_message = %record.exception_message,
            stack_trace = %record.stack_trace,
            failed_at = %record.failed_at,
            "job moved to failed state"
        );
        if let Err(error) = self.store.record(record).await {
            tracing::error!(job_id = %change.job.id, %error, "could not persist failed job record");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;
    use crate::{InMemoryFailedJobStore, JobId};

    struct Named(&'static str, Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl JobFilter for Named {
        async fn on_performed(&self, _context: &PerformedContext) {
            self.1.lock().unwrap().push(self.0);
        }
    }

    fn record(state: JobState) -> JobRecord {
        JobRecord {
            id: JobId::new(),
            job_type: "SendConfirmationEmailJob".to_string(),
            method: "run".to_string(),
            arguments: serde_json::json!({}),
            state,
            parent_id: None,
            created_at: Utc::now(),
            scheduled_for: None,
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_registry_sorts_by_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = FilterRegistry::new()
            .register(20, Arc::new(Named("late", calls.clone())))
            .register(-5, Arc::new(Named("early", calls.clone())))
            .register(20, Arc::new(Named("late-second", calls.clone())));

        let context = PerformedContext {
            job: record(JobState::Processing),
            outcome: Ok(()),
            duration: Duration::from_millis(1),
        };
        for filter in registry.into_sorted() {
            filter.on_performed(&context).await;
        }

        assert_eq!(*calls.lock().unwrap(), vec!["early", "late", "late-second"]);
    }

    #[tokio::test]
    async fn test_error_handler_persists_only_failed_transitions() {
        let store = InMemoryFailedJobStore::new();
        let handler = JobErrorHandler::new(Arc::new(store.clone()));

        handler
            .on_state_changed(&StateChange {
                job: record(JobState::Succeeded),
                old_state: JobState::Processing,
                new_state: JobState::Succeeded,
                failure: None,
            })
            .await;
        assert!(store.is_empty());

        let failed = record(JobState::Failed);
        handler
            .on_state_changed(&StateChange {
                job: failed.clone(),
                old_state: JobState::Processing,
                new_state: JobState::Failed,
                failure: Some(JobFailure::new("SmtpError", "relay refused")),
            })
            .await;

        let records = store.for_job(failed.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].exception_message, "relay refused");
        assert_eq!(records[0].job_type, "SendConfirmationEmailJob");
    }

    #[tokio::test]
    async fn test_error_handler_swallows_store_failure() {
        let store = InMemoryFailedJobStore::new();
        store.set_fail_on_record(true);
        let handler = JobErrorHandler::new(Arc::new(store.clone()));

        handler
            .on_state_changed(&StateChange {
                job: record(JobState::Failed),
                old_state: JobState::Processing,
                new_state: JobState::Failed,
                failure: Some(JobFailure::new("x", "y")),
            })
            .await;

        assert!(store.is_empty());
    }
}
