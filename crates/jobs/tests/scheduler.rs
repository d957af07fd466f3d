//! Behavioural tests for the job scheduler.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobs::{
    FailedJobStore, FilterRegistry, InMemoryFailedJobStore, Job, JobClient, JobError,
    JobErrorHandler, JobFailure, JobId, JobScheduler, JobState, JobsConfig,
};
use tokio::sync::Barrier;

#[derive(Debug, thiserror::Error)]
#[error("payment gateway declined")]
struct Declined;

/// Appends its name to a shared log; fails while `fail` is set.
struct Step {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl Job for Step {
    fn job_type(&self) -> &'static str {
        "Step"
    }

    fn arguments(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.name })
    }

    async fn run(&self) -> Result<(), JobFailure> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Declined.into());
        }
        self.log.lock().unwrap().push(self.name);
        Ok(())
    }
}

struct Panics;

#[async_trait]
impl Job for Panics {
    fn job_type(&self) -> &'static str {
        "Panics"
    }

    fn arguments(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    async fn run(&self) -> Result<(), JobFailure> {
        panic!("worker exploded");
    }
}

struct Sleeps(Duration);

#[async_trait]
impl Job for Sleeps {
    fn job_type(&self) -> &'static str {
        "Sleeps"
    }

    fn arguments(&self) -> serde_json::Value {
        serde_json::json!({ "ms": self.0.as_millis() as u64 })
    }

    async fn run(&self) -> Result<(), JobFailure> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

struct WaitsAtBarrier(Arc<Barrier>, Arc<AtomicUsize>);

#[async_trait]
impl Job for WaitsAtBarrier {
    fn job_type(&self) -> &'static str {
        "WaitsAtBarrier"
    }

    fn arguments(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    async fn run(&self) -> Result<(), JobFailure> {
        self.0.wait().await;
        self.1.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Fixture {
    scheduler: JobScheduler,
    failed: InMemoryFailedJobStore,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Fixture {
    fn new(config: JobsConfig) -> Self {
        let failed = InMemoryFailedJobStore::new();
        let filters =
            FilterRegistry::new().register(0, Arc::new(JobErrorHandler::new(Arc::new(failed.clone()))));
        Self {
            scheduler: JobScheduler::new(config, filters),
            failed,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn step(&self, name: &'static str) -> Box<dyn Job> {
        self.failing_step(name, Arc::new(AtomicBool::new(false)))
    }

    fn failing_step(&self, name: &'static str, fail: Arc<AtomicBool>) -> Box<dyn Job> {
        Box::new(Step {
            name,
            log: Arc::clone(&self.log),
            fail,
        })
    }

    fn log(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }

    async fn wait_for(&self, id: JobId, state: JobState) {
        for _ in 0..300 {
            if self.scheduler.state(id) == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "job {id} never reached {state}, last state {:?}",
            self.scheduler.state(id)
        );
    }
}

fn fast_config() -> JobsConfig {
    JobsConfig::default().with_poll_interval(Duration::from_millis(20))
}

#[tokio::test]
async fn test_enqueued_job_runs_to_success() {
    let f = Fixture::new(fast_config());
    f.scheduler.start();

    let id = f.scheduler.enqueue(f.step("only"));
    f.wait_for(id, JobState::Succeeded).await;

    assert_eq!(f.log(), vec!["only"]);
    let record = f.scheduler.job(id).unwrap();
    assert_eq!(record.job_type, "Step");
    assert_eq!(record.arguments["name"], "only");
    assert!(record.started_at.is_some());
    assert!(record.finished_at.is_some());
}

#[tokio::test]
async fn test_jobs_enqueued_before_start_wait_for_workers() {
    let f = Fixture::new(fast_config());
    let id = f.scheduler.enqueue(f.step("early"));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(f.scheduler.state(id), Some(JobState::Enqueued));

    f.scheduler.start();
    f.wait_for(id, JobState::Succeeded).await;
}

#[tokio::test]
async fn test_continuations_run_in_chain_order() {
    let f = Fixture::new(fast_config());
    let first = f.scheduler.enqueue(f.step("initial"));
    let second = f
        .scheduler
        .continue_job_with(first, f.step("capture payment"))
        .unwrap();
    let third = f
        .scheduler
        .continue_job_with(second, f.step("prepare shipment"))
        .unwrap();
    let fourth = f
        .scheduler
        .continue_job_with(third, f.step("send confirmation"))
        .unwrap();

    assert_eq!(f.scheduler.state(second), Some(JobState::Awaiting));
    assert_eq!(f.scheduler.job(third).unwrap().parent_id, Some(second));

    f.scheduler.start();
    f.wait_for(fourth, JobState::Succeeded).await;

    assert_eq!(
        f.log(),
        vec![
            "initial",
            "capture payment",
            "prepare shipment",
            "send confirmation"
        ]
    );
}

#[tokio::test]
async fn test_continue_unknown_parent_returns_none() {
    let f = Fixture::new(fast_config());
    assert!(
        f.scheduler
            .continue_job_with(JobId::new(), f.step("orphan"))
            .is_none()
    );
}

#[tokio::test]
async fn test_continue_succeeded_parent_runs_immediately() {
    let f = Fixture::new(fast_config());
    f.scheduler.start();
    let parent = f.scheduler.enqueue(f.step("parent"));
    f.wait_for(parent, JobState::Succeeded).await;

    let child = f
        .scheduler
        .continue_job_with(parent, f.step("child"))
        .unwrap();
    f.wait_for(child, JobState::Succeeded).await;
    assert_eq!(f.log(), vec!["parent", "child"]);
}

#[tokio::test]
async fn test_failed_parent_leaves_continuations_awaiting() {
    let f = Fixture::new(fast_config());
    let fail = Arc::new(AtomicBool::new(true));
    let parent = f
        .scheduler
        .enqueue(f.failing_step("capture payment", Arc::clone(&fail)));
    let child = f
        .scheduler
        .continue_job_with(parent, f.step("prepare shipment"))
        .unwrap();

    f.scheduler.start();
    f.wait_for(parent, JobState::Failed).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(f.scheduler.state(child), Some(JobState::Awaiting));
    assert!(f.log().is_empty());

    let records = f.failed.for_job(parent).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].exception_type.ends_with("Declined"));
    assert_eq!(records[0].exception_message, "payment gateway declined");
    assert_eq!(records[0].arguments["name"], "capture payment");

    // No automatic retry.
    assert_eq!(f.scheduler.state(parent), Some(JobState::Failed));
    assert!(
        f.scheduler
            .job(parent)
            .unwrap()
            .last_error
            .unwrap()
            .contains("payment gateway declined")
    );
}

#[tokio::test]
async fn test_requeue_resumes_chain() {
    let f = Fixture::new(fast_config());
    let fail = Arc::new(AtomicBool::new(true));
    let parent = f
        .scheduler
        .enqueue(f.failing_step("capture payment", Arc::clone(&fail)));
    let child = f
        .scheduler
        .continue_job_with(parent, f.step("prepare shipment"))
        .unwrap();
    f.scheduler.start();
    f.wait_for(parent, JobState::Failed).await;

    fail.store(false, Ordering::SeqCst);
    f.scheduler.requeue(parent).unwrap();

    f.wait_for(child, JobState::Succeeded).await;
    assert_eq!(f.log(), vec!["capture payment", "prepare shipment"]);
    assert_eq!(f.failed.len(), 1);
}

#[tokio::test]
async fn test_requeue_rejects_non_failed_jobs() {
    let f = Fixture::new(fast_config());
    let id = f.scheduler.enqueue(f.step("queued"));

    assert!(matches!(
        f.scheduler.requeue(id),
        Err(JobError::InvalidState {
            state: JobState::Enqueued,
            ..
        })
    ));
    assert!(matches!(
        f.scheduler.requeue(JobId::new()),
        Err(JobError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_removes_awaiting_chain() {
    let f = Fixture::new(fast_config());
    let parent = f.scheduler.enqueue(f.step("parent"));
    let child = f.scheduler.continue_job_with(parent, f.step("child")).unwrap();
    let grandchild = f
        .scheduler
        .continue_job_with(child, f.step("grandchild"))
        .unwrap();

    f.scheduler.delete(parent).unwrap();
    f.scheduler.start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(f.scheduler.state(parent), Some(JobState::Deleted));
    assert_eq!(f.scheduler.state(child), Some(JobState::Deleted));
    assert_eq!(f.scheduler.state(grandchild), Some(JobState::Deleted));
    assert!(f.log().is_empty());
    assert!(
        f.scheduler
            .continue_job_with(parent, f.step("late"))
            .is_none()
    );
}

#[tokio::test]
async fn test_scheduled_job_waits_for_delay() {
    let f = Fixture::new(fast_config());
    f.scheduler.start();

    let id = f
        .scheduler
        .schedule(f.step("later"), Duration::from_millis(100));
    assert_eq!(f.scheduler.state(id), Some(JobState::Scheduled));
    assert!(f.scheduler.job(id).unwrap().scheduled_for.is_some());

    f.wait_for(id, JobState::Succeeded).await;
    assert_eq!(f.log(), vec!["later"]);
}

#[tokio::test]
async fn test_scheduled_job_does_not_run_after_shutdown() {
    let f = Fixture::new(fast_config());
    f.scheduler.start();
    let id = f
        .scheduler
        .schedule(f.step("never"), Duration::from_millis(100));

    f.scheduler.shutdown().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(f.scheduler.state(id), Some(JobState::Scheduled));
    assert!(f.log().is_empty());
}

#[tokio::test]
async fn test_panicking_job_is_failed() {
    let f = Fixture::new(fast_config());
    f.scheduler.start();

    let id = f.scheduler.enqueue(Box::new(Panics));
    f.wait_for(id, JobState::Failed).await;

    let records = f.failed.for_job(id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].exception_type, "panic");
    assert_eq!(records[0].exception_message, "worker exploded");
}

#[tokio::test]
async fn test_run_longer_than_invisibility_timeout_fails() {
    let f = Fixture::new(fast_config().with_invisibility_timeout(Duration::from_millis(20)));
    f.scheduler.start();

    let id = f
        .scheduler
        .enqueue(Box::new(Sleeps(Duration::from_secs(5))));
    f.wait_for(id, JobState::Failed).await;

    let records = f.failed.for_job(id).await.unwrap();
    assert_eq!(records[0].exception_type, "timeout");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_workers_run_jobs_concurrently() {
    let f = Fixture::new(fast_config().with_worker_count(2));
    f.scheduler.start();

    let barrier = Arc::new(Barrier::new(2));
    let done = Arc::new(AtomicUsize::new(0));
    let a = f.scheduler.enqueue(Box::new(WaitsAtBarrier(
        Arc::clone(&barrier),
        Arc::clone(&done),
    )));
    let b = f.scheduler.enqueue(Box::new(WaitsAtBarrier(
        Arc::clone(&barrier),
        Arc::clone(&done),
    )));

    f.wait_for(a, JobState::Succeeded).await;
    f.wait_for(b, JobState::Succeeded).await;
    assert_eq!(done.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_jobs_in_state_lists_matching_records() {
    let f = Fixture::new(fast_config());
    let parent = f.scheduler.enqueue(f.step("parent"));
    f.scheduler.continue_job_with(parent, f.step("child"));

    assert_eq!(f.scheduler.jobs_in_state(JobState::Enqueued).len(), 1);
    assert_eq!(f.scheduler.jobs_in_state(JobState::Awaiting).len(), 1);
}

#[tokio::test]
async fn test_finished_jobs_are_purged_after_retention() {
    let f = Fixture::new(fast_config().with_finished_retention(Duration::from_millis(100)));
    let fail = Arc::new(AtomicBool::new(true));
    let succeeded = f.scheduler.enqueue(f.step("done"));
    let failed = f.scheduler.enqueue(f.failing_step("broken", fail));
    let deleted = f.scheduler.schedule(f.step("dropped"), Duration::from_secs(60));
    f.scheduler.delete(deleted).unwrap();
    f.scheduler.start();

    f.wait_for(succeeded, JobState::Succeeded).await;
    f.wait_for(failed, JobState::Failed).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(f.scheduler.state(succeeded), None);
    assert_eq!(f.scheduler.state(deleted), None);
    assert_eq!(f.scheduler.state(failed), Some(JobState::Failed));
    assert!(f.scheduler.continue_job_with(succeeded, f.step("late")).is_none());
    f.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_finished_jobs_stay_inspectable_within_retention() {
    let f = Fixture::new(fast_config());
    f.scheduler.start();

    let id = f.scheduler.enqueue(f.step("kept"));
    f.wait_for(id, JobState::Succeeded).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(f.scheduler.state(id), Some(JobState::Succeeded));
    f.scheduler.shutdown().await;
}
