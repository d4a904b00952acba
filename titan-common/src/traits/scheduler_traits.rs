use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// When a registered job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fire every `every`, the first time after `initial_delay`.
    Interval { every: Duration, initial_delay: Duration },
}

impl Trigger {
    pub fn every(every: Duration) -> Self {
        Trigger::Interval { every, initial_delay: every }
    }
}

/// Handed to every job execution.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub fired_at: DateTime<Utc>,
    /// 1-based count of executions of this job, including this one.
    pub execution: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { detail: String },
    Failed { reason: String },
}

impl JobOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failed { .. })
    }
}

/// A recurring unit of work. Failures are reported through `JobOutcome`,
/// never by panicking or returning early from the schedule.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, ctx: JobContext) -> JobOutcome;
}

/// The scheduler the core registers jobs with.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn register(&self, job: Arc<dyn Job>, trigger: Trigger) -> Result<JobId, Error>;
    async fn start(&self) -> Result<(), Error>;

    /// Stops firing triggers. With `wait_for_jobs_to_complete`, also waits for
    /// executions that are already running.
    async fn shutdown(&self, wait_for_jobs_to_complete: bool) -> Result<(), Error>;

    fn is_shutdown(&self) -> bool;
}
