//! Job scheduler configuration.

use std::time::Duration;

/// Settings for a [`JobScheduler`](crate::JobScheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobsConfig {
    /// Identifies the job store; logged at startup.
    pub connection_string: String,
    /// Number of worker tasks.
    pub worker_count: usize,
    /// Longest wait between checks for due delayed jobs.
    pub poll_interval: Duration,
    /// How long shutdown waits for in-flight jobs.
    pub batch_timeout: Duration,
    /// Longest a single run may take before it is failed.
    pub invisibility_timeout: Duration,
    /// How long succeeded and deleted jobs stay inspectable before they are
    /// purged. Failed jobs are kept until requeued or deleted.
    pub finished_retention: Duration,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            connection_string: "memory://jobs".to_string(),
            worker_count: 5,
            poll_interval: Duration::from_secs(15),
            batch_timeout: Duration::from_secs(5 * 60),
            invisibility_timeout: Duration::from_secs(30 * 60),
            finished_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl JobsConfig {
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_invisibility_timeout(mut self, timeout: Duration) -> Self {
        self.invisibility_timeout = timeout;
        self
    }

    pub fn with_finished_retention(mut self, retention: Duration) -> Self {
        self.finished_retention = retention;
        self
    }

    /// Worker count, with zero treated as unset.
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            JobsConfig::default().worker_count
        } else {
            self.worker_count
        }
    }
}
