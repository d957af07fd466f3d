//! Records of jobs that ended in the failed state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobError, JobFailure, JobId, JobRecord, Result};

/// Structured payload kept for triage of a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedJobRecord {
    pub job_id: JobId,
    pub job_type: String,
    pub method: String,
    pub arguments: serde_json::Value,
    pub exception_type: String,
    pub exception_message: String,
    pub stack_trace: String,
    pub failed_at: DateTime<Utc>,
}

impl FailedJobRecord {
    pub fn new(job: &JobRecord, failure: &JobFailure) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            method: job.method.clone(),
            arguments: job.arguments.clone(),
            exception_type: failure.exception_type.clone(),
            exception_message: failure.message.clone(),
            stack_trace: failure.stack_trace.join("\n"),
            failed_at: job.finished_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Persistence for [`FailedJobRecord`]s.
#[async_trait]
pub trait FailedJobStore: Send + Sync {
    async fn record(&self, record: FailedJobRecord) -> Result<()>;

    /// Returns every failure recorded for `job_id`, oldest first.
    async fn for_job(&self, job_id: JobId) -> Result<Vec<FailedJobRecord>>;

    /// Returns every record, oldest first.
    async fn all(&self) -> Result<Vec<FailedJobRecord>>;
}

#[derive(Default)]
struct StoreState {
    records: HashMap<JobId, Vec<FailedJobRecord>>,
    fail_on_record: bool,
}

/// In-memory failed-job store.
#[derive(Clone, Default)]
pub struct InMemoryFailedJobStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryFailedJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to fail on the next `record` calls.
    pub fn set_fail_on_record(&self, fail: bool) {
        self.state.write().unwrap().fail_on_record = fail;
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FailedJobStore for InMemoryFailedJobStore {
    async fn record(&self, record: FailedJobRecord) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_record {
            return Err(JobError::Store("failed-job store unavailable".to_string()));
        }
        state.records.entry(record.job_id).or_default().push(record);
        Ok(())
    }

    async fn for_job(&self, job_id: JobId) -> Result<Vec<FailedJobRecord>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .records
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn all(&self) -> Result<Vec<FailedJobRecord>> {
        let state = self.state.read().unwrap();
        let mut records: Vec<FailedJobRecord> =
            state.records.values().flatten().cloned().collect();
        records.sort_by_key(|r| r.failed_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobState;

    fn job_record() -> JobRecord {
        JobRecord {
            id: JobId::new(),
            job_type: "CapturePaymentJob".to_string(),
            method: "run".to_string(),
            arguments: serde_json::json!({ "order_id": "o-1" }),
            state: JobState::Failed,
            parent_id: None,
            created_at: Utc::now(),
            scheduled_for: None,
            started_at: None,
            finished_at: Some(Utc::now()),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_record_keeps_every_failure_per_job() {
        let store = InMemoryFailedJobStore::new();
        let job = job_record();
        let mut failure = JobFailure::new("PaymentError", "declined");
        failure.stack_trace = vec!["card expired".to_string(), "issuer said no".to_string()];

        store
            .record(FailedJobRecord::new(&job, &failure))
            .await
            .unwrap();
        store
            .record(FailedJobRecord::new(&job, &failure))
            .await
            .unwrap();

        let records = store.for_job(job.id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].exception_type, "PaymentError");
        assert_eq!(records[0].stack_trace, "card expired\nissuer said no");
        assert_eq!(records[0].arguments["order_id"], "o-1");
        assert_eq!(store.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fail_on_record() {
        let store = InMemoryFailedJobStore::new();
        store.set_fail_on_record(true);
        let job = job_record();
        let result = store
            .record(FailedJobRecord::new(&job, &JobFailure::new("x", "y")))
            .await;
        assert!(matches!(result, Err(JobError::Store(_))));
        assert!(store.is_empty());
    }
}
