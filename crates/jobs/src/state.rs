//! Job state machine.

use serde::{Deserialize, Serialize};

/// The state of a job in its lifecycle.
///
/// State transitions:
/// ```text
/// Scheduled ──► Enqueued ──► Processing ──┬──► Succeeded
/// Awaiting ───►                           └──► Failed ──► Enqueued (requeue)
/// ```
/// Any job that is not processing can be moved to `Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting for its delay to elapse.
    Scheduled,

    /// A continuation waiting for its parent to succeed.
    Awaiting,

    /// Ready for a worker.
    Enqueued,

    /// Being executed by a worker.
    Processing,

    /// Finished without error (terminal state).
    Succeeded,

    /// Finished with an error; waits for an operator requeue.
    Failed,

    /// Removed by an operator (terminal state).
    Deleted,
}

impl JobState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Deleted)
    }

    /// Returns true if an operator may delete a job in this state.
    pub fn can_delete(&self) -> bool {
        !matches!(self, JobState::Processing | JobState::Deleted)
    }

    /// Returns true if an operator may requeue a job in this state.
    pub fn can_requeue(&self) -> bool {
        matches!(self, JobState::Failed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Scheduled => "Scheduled",
            JobState::Awaiting => "Awaiting",
            JobState::Enqueued => "Enqueued",
            JobState::Processing => "Processing",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
            JobState::Deleted => "Deleted",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Deleted.is_terminal());
        assert!(!JobState::Failed.is_terminal());
        assert!(!JobState::Awaiting.is_terminal());
    }

    #[test]
    fn test_operator_actions() {
        assert!(JobState::Failed.can_requeue());
        assert!(!JobState::Succeeded.can_requeue());
        assert!(!JobState::Processing.can_delete());
        assert!(!JobState::Deleted.can_delete());
        assert!(JobState::Awaiting.can_delete());
        assert!(JobState::Failed.can_delete());
    }

    #[test]
    fn test_display() {
        assert_eq!(JobState::Awaiting.to_string(), "Awaiting");
        assert_eq!(JobState::Processing.to_string(), "Processing");
    }
}
