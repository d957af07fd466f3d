//! In-process job scheduler with a worker pool.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    FilterRegistry, Job, JobClient, JobError, JobFailure, JobFilter, JobId, JobRecord, JobState,
    JobsConfig, PerformedContext, Result, StateChange,
};

struct JobEntry {
    record: JobRecord,
    job: Arc<dyn Job>,
    due: Option<Instant>,
    finished: Option<Instant>,
    continuations: Vec<JobId>,
}

impl JobEntry {
    fn expired(&self, now: Instant, retention: Duration) -> bool {
        matches!(self.record.state, JobState::Succeeded | JobState::Deleted)
            && self
                .finished
                .is_some_and(|finished| now.saturating_duration_since(finished) >= retention)
    }
}

struct Shared {
    config: JobsConfig,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    ready_tx: mpsc::UnboundedSender<JobId>,
    ready_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<JobId>>,
    schedule_changed: Notify,
    filters: Vec<Arc<dyn JobFilter>>,
}

impl Shared {
    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn make_ready(&self, id: JobId) {
        // The receiver lives as long as `self`, so send cannot fail.
        let _ = self.ready_tx.send(id);
        metrics::counter!("jobs_enqueued_total").increment(1);
    }

    /// Enqueues delayed jobs that are due and returns the next due time.
    fn promote_due(&self) -> Option<Instant> {
        let now = Instant::now();
        let mut ready = Vec::new();
        let mut next_due: Option<Instant> = None;
        {
            let mut jobs = self.jobs();
            for (id, entry) in jobs.iter_mut() {
                if entry.record.state != JobState::Scheduled {
                    continue;
                }
                match entry.due {
                    Some(due) if due > now => {
                        next_due = Some(next_due.map_or(due, |next| next.min(due)));
                    }
                    _ => {
                        entry.record.state = JobState::Enqueued;
                        ready.push(*id);
                    }
                }
            }
        }
        for id in ready {
            tracing::debug!(job_id = %id, "delayed job is due");
            self.make_ready(id);
        }
        next_due
    }

    /// Drops succeeded and deleted jobs older than the retention window.
    fn purge_finished(&self) -> usize {
        let now = Instant::now();
        let retention = self.config.finished_retention;
        let mut jobs = self.jobs();
        let before = jobs.len();
        jobs.retain(|_, entry| !entry.expired(now, retention));
        let purged = before - jobs.len();
        if purged > 0 {
            tracing::debug!(purged, remaining = jobs.len(), "finished jobs purged");
        }
        purged
    }

    async fn perform(&self, id: JobId) {
        let (job, started) = {
            let mut jobs = self.jobs();
            let Some(entry) = jobs.get_mut(&id) else {
                return;
            };
            // Deleted while waiting in the queue.
            if entry.record.state != JobState::Enqueued {
                return;
            }
            entry.record.state = JobState::Processing;
            entry.record.started_at = Some(Utc::now());
            entry.record.finished_at = None;
            entry.record.last_error = None;
            (Arc::clone(&entry.job), entry.record.clone())
        };

        tracing::info!(job_id = %id, job_type = %started.job_type, "job started");
        let clock = std::time::Instant::now();
        let timeout = self.config.invisibility_timeout;
        let handle = tokio::spawn(async move { tokio::time::timeout(timeout, job.run()).await });
        let outcome = match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(JobFailure::new(
                "timeout",
                format!("run exceeded {}s", timeout.as_secs_f64()),
            )),
            Err(error) if error.is_panic() => {
                Err(JobFailure::panic(panic_message(error.into_panic())))
            }
            Err(error) => Err(JobFailure::new("cancelled", error.to_string())),
        };
        let duration = clock.elapsed();
        metrics::histogram!("job_duration_seconds", "job_type" => started.job_type.clone())
            .record(duration.as_secs_f64());

        let performed = PerformedContext {
            job: started,
            outcome,
            duration,
        };
        for filter in &self.filters {
            filter.on_performed(&performed).await;
        }

        let new_state = if performed.outcome.is_ok() {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        let (record, ready) = {
            let mut jobs = self.jobs();
            let Some(entry) = jobs.get_mut(&id) else {
                return;
            };
            entry.record.state = new_state;
            entry.record.finished_at = Some(Utc::now());
            entry.finished = Some(Instant::now());
            entry.record.last_error = performed.outcome.as_ref().err().map(ToString::to_string);
            let record = entry.record.clone();
            let children = entry.continuations.clone();

            let mut ready = Vec::new();
            if new_state == JobState::Succeeded {
                for child in children {
                    if let Some(continuation) = jobs.get_mut(&child)
                        && continuation.record.state == JobState::Awaiting
                    {
                        continuation.record.state = JobState::Enqueued;
                        ready.push(child);
                    }
                }
            }
            (record, ready)
        };

        match &performed.outcome {
            Ok(()) => {
                metrics::counter!("jobs_succeeded_total").increment(1);
                tracing::info!(
                    job_id = %id,
                    duration_ms = duration.as_millis() as u64,
                    continuations = ready.len(),
                    "job succeeded"
                );
            }
            Err(failure) => {
                metrics::counter!("jobs_failed_total").increment(1);
                tracing::warn!(job_id = %id, %failure, "job failed");
            }
        }
        for child in ready {
            self.make_ready(child);
        }

        let change = StateChange {
            job: record,
            old_state: JobState::Processing,
            new_state,
            failure: performed.outcome.err(),
        };
        for filter in &self.filters {
            filter.on_state_changed(&change).await;
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs jobs on a pool of worker tasks.
///
/// Jobs can be enqueued before [`start`](Self::start); they wait in the queue
/// until workers exist. Failed jobs are not retried automatically.
pub struct JobScheduler {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Creates a scheduler. Filters are sorted once, here.
    pub fn new(config: JobsConfig, filters: FilterRegistry) -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                config,
                jobs: Mutex::new(HashMap::new()),
                ready_tx,
                ready_rx: tokio::sync::Mutex::new(ready_rx),
                schedule_changed: Notify::new(),
                filters: filters.into_sorted(),
            }),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the workers and the delayed-job promoter. Later calls do nothing.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let worker_count = self.shared.config.effective_worker_count();
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for worker in 0..worker_count {
            tasks.push(tokio::spawn(worker_loop(
                Arc::clone(&self.shared),
                worker,
                self.shutdown.child_token(),
            )));
        }
        tasks.push(tokio::spawn(promote_loop(
            Arc::clone(&self.shared),
            self.shutdown.child_token(),
        )));

        tracing::info!(
            worker_count,
            store = %self.shared.config.connection_string,
            "job scheduler started"
        );
    }

    /// Stops taking new work and waits for in-flight jobs, up to the batch timeout.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let all_done = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        if tokio::time::timeout(self.shared.config.batch_timeout, all_done)
            .await
            .is_err()
        {
            tracing::warn!("jobs still running at shutdown, aborting workers");
            for abort in aborts {
                abort.abort();
            }
        }
        tracing::info!("job scheduler stopped");
    }

    pub fn state(&self, id: JobId) -> Option<JobState> {
        self.shared.jobs().get(&id).map(|e| e.record.state)
    }

    pub fn job(&self, id: JobId) -> Option<JobRecord> {
        self.shared.jobs().get(&id).map(|e| e.record.clone())
    }

    /// Returns every job currently in `state`.
    pub fn jobs_in_state(&self, state: JobState) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .shared
            .jobs()
            .values()
            .filter(|e| e.record.state == state)
            .map(|e| e.record.clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Moves a failed job back to the queue. Its awaiting continuations
    /// run if it then succeeds.
    #[tracing::instrument(skip(self))]
    pub fn requeue(&self, id: JobId) -> Result<()> {
        {
            let mut jobs = self.shared.jobs();
            let entry = jobs.get_mut(&id).ok_or(JobError::JobNotFound(id))?;
            if !entry.record.state.can_requeue() {
                return Err(JobError::InvalidState {
                    job_id: id,
                    state: entry.record.state,
                    action: "requeue",
                });
            }
            entry.record.state = JobState::Enqueued;
            entry.record.last_error = None;
            entry.finished = None;
        }
        self.shared.make_ready(id);
        tracing::info!("job requeued");
        Ok(())
    }

    /// Deletes a job that is not running, along with every continuation
    /// still awaiting it.
    #[tracing::instrument(skip(self))]
    pub fn delete(&self, id: JobId) -> Result<()> {
        let mut jobs = self.shared.jobs();
        let state = jobs
            .get(&id)
            .map(|e| e.record.state)
            .ok_or(JobError::JobNotFound(id))?;
        if !state.can_delete() {
            return Err(JobError::InvalidState {
                job_id: id,
                state,
                action: "delete",
            });
        }

        let now = Utc::now();
        let finished = Instant::now();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let Some(entry) = jobs.get_mut(&current) else {
                continue;
            };
            if current != id && entry.record.state != JobState::Awaiting {
                continue;
            }
            entry.record.state = JobState::Deleted;
            entry.record.finished_at = Some(now);
            entry.finished = Some(finished);
            pending.extend(entry.continuations.iter().copied());
        }
        tracing::info!("job deleted");
        Ok(())
    }

    fn insert(&self, job: Box<dyn Job>, state: JobState, parent_id: Option<JobId>) -> JobId {
        let id = JobId::new();
        let job: Arc<dyn Job> = Arc::from(job);
        let mut record = JobRecord::describe(id, job.as_ref(), state);
        record.parent_id = parent_id;
        self.shared.jobs().insert(
            id,
            JobEntry {
                record,
                job,
                due: None,
                finished: None,
                continuations: Vec::new(),
            },
        );
        id
    }
}

impl JobClient for JobScheduler {
    fn enqueue(&self, job: Box<dyn Job>) -> JobId {
        let job_type = job.job_type();
        let id = self.insert(job, JobState::Enqueued, None);
        self.shared.make_ready(id);
        tracing::info!(job_id = %id, job_type, "job enqueued");
        id
    }

    fn schedule(&self, job: Box<dyn Job>, delay: Duration) -> JobId {
        if delay.is_zero() {
            return self.enqueue(job);
        }

        let job_type = job.job_type();
        let id = self.insert(job, JobState::Scheduled, None);
        if let Some(entry) = self.shared.jobs().get_mut(&id) {
            entry.due = Some(Instant::now() + delay);
            entry.record.scheduled_for = chrono::Duration::from_std(delay)
                .ok()
                .map(|delay| entry.record.created_at + delay);
        }
        self.shared.schedule_changed.notify_one();
        tracing::info!(job_id = %id, job_type, delay_ms = delay.as_millis() as u64, "job scheduled");
        id
    }

    fn continue_job_with(&self, parent: JobId, job: Box<dyn Job>) -> Option<JobId> {
        let job_type = job.job_type();
        let parent_state = self.state(parent)?;
        if parent_state == JobState::Deleted {
            tracing::warn!(parent_id = %parent, job_type, "cannot continue a deleted job");
            return None;
        }

        let initial = if parent_state == JobState::Succeeded {
            JobState::Enqueued
        } else {
            JobState::Awaiting
        };
        let id = self.insert(job, initial, Some(parent));

        // The parent may have finished since its state was read.
        let ready = {
            let mut jobs = self.shared.jobs();
            let parent_state = match jobs.get_mut(&parent) {
                Some(entry) => {
                    entry.continuations.push(id);
                    entry.record.state
                }
                None => return None,
            };
            match jobs.get_mut(&id) {
                Some(entry)
                    if entry.record.state == JobState::Awaiting
                        && parent_state == JobState::Succeeded =>
                {
                    entry.record.state = JobState::Enqueued;
                    true
                }
                Some(entry) => entry.record.state == JobState::Enqueued,
                None => false,
            }
        };
        if ready {
            self.shared.make_ready(id);
        }

        tracing::info!(job_id = %id, parent_id = %parent, job_type, "continuation registered");
        Some(id)
    }
}

async fn worker_loop(shared: Arc<Shared>, worker: usize, shutdown: CancellationToken) {
    tracing::debug!(worker, "job worker started");
    loop {
        let next = {
            let mut ready = tokio::select! {
                _ = shutdown.cancelled() => break,
                guard = shared.ready_rx.lock() => guard,
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                id = ready.recv() => id,
            }
        };
        let Some(id) = next else {
            break;
        };
        shared.perform(id).await;
    }
    tracing::debug!(worker, "job worker stopped");
}

async fn promote_loop(shared: Arc<Shared>, shutdown: CancellationToken) {
    let poll_interval = shared.config.poll_interval;
    loop {
        shared.purge_finished();
        let wait = shared.promote_due().map_or(poll_interval, |due| {
            due.saturating_duration_since(Instant::now())
                .min(poll_interval)
        });
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
            _ = shared.schedule_changed.notified() => {}
        }
    }
}
