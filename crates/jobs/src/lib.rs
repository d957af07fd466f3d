//! Background job scheduling for post-order work.
//!
//! This crate provides:
//! - The [`Job`] trait and the [`JobClient`] interface producers use to
//!   enqueue, delay and chain jobs
//! - [`JobScheduler`], an in-process scheduler running jobs on a worker pool
//! - Continuation chains: a job that runs only after its parent succeeds
//! - [`JobFilter`]s, ordered in a [`FilterRegistry`], observing every
//!   execution, and the [`JobErrorHandler`] filter that records failures
//!
//! Failed jobs are never retried automatically; an operator replays them
//! with [`JobScheduler::requeue`].

pub mod config;
pub mod error;
pub mod failed;
pub mod filter;
pub mod job;
pub mod scheduler;
pub mod state;

pub use config::JobsConfig;
pub use error::{JobError, Result};
pub use failed::{FailedJobRecord, FailedJobStore, InMemoryFailedJobStore};
pub use filter::{FilterRegistry, JobErrorHandler, JobFilter, PerformedContext, StateChange};
pub use job::{Job, JobClient, JobFailure, JobId, JobRecord};
pub use scheduler::JobScheduler;
pub use state::JobState;
