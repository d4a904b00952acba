//! src/scheduler/mod.rs
//!
//! A small interval scheduler. One loop task per registered job; every
//! execution runs in its own task so a panicking job only loses that run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use titan_common::traits::{Job, JobContext, JobId, JobOutcome, JobScheduler, Trigger};

use crate::Error;

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

struct Registration {
    id: JobId,
    job: Arc<dyn Job>,
    trigger: Trigger,
}

pub struct IntervalScheduler {
    /// Registered before `start`; moved into loops once started.
    pending: Mutex<Vec<Registration>>,
    started: AtomicBool,
    shut_down: AtomicBool,
    stop: CancellationToken,
    loops: TaskTracker,
    executions: TaskTracker,
    drain_timeout: Duration,
}

impl Default for IntervalScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_DRAIN_TIMEOUT)
    }
}

impl IntervalScheduler {
    /// `drain_timeout` bounds how long `shutdown(true)` waits for running jobs.
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            stop: CancellationToken::new(),
            loops: TaskTracker::new(),
            executions: TaskTracker::new(),
            drain_timeout,
        }
    }

    /// Number of job executions currently running.
    pub fn running(&self) -> usize {
        self.executions.len()
    }

    fn spawn_loop(&self, registration: Registration) {
        let Registration { id, job, trigger } = registration;
        let Trigger::Interval { every, initial_delay } = trigger;
        let stop = self.stop.clone();
        let executions = self.executions.clone();

        self.loops.spawn(async move {
            let mut ticker = interval_at(Instant::now() + initial_delay, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut execution = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                execution += 1;
                let ctx = JobContext { job_id: id, fired_at: Utc::now(), execution };
                let runner = job.clone();
                let handle = executions.spawn(async move { runner.run(ctx).await });

                match handle.await {
                    Ok(JobOutcome::Completed { detail }) => {
                        debug!("Job '{}' run #{} completed: {}", job.name(), execution, detail);
                    }
                    Ok(JobOutcome::Failed { reason }) => {
                        warn!("Job '{}' run #{} failed: {}", job.name(), execution, reason);
                    }
                    Err(e) => {
                        error!("Job '{}' run #{} aborted: {}", job.name(), execution, e);
                    }
                }
            }
            debug!("Job '{}' loop stopped after {} run(s).", job.name(), execution);
        });
    }
}

#[async_trait]
impl JobScheduler for IntervalScheduler {
    async fn register(&self, job: Arc<dyn Job>, trigger: Trigger) -> Result<JobId, Error> {
        if self.is_shutdown() {
            return Err(Error::Scheduler("scheduler is shut down".into()));
        }
        let Trigger::Interval { every, .. } = trigger;
        if every.is_zero() {
            return Err(Error::Scheduler(format!(
                "job '{}' has a zero interval", job.name()
            )));
        }

        let id = JobId::new();
        info!("Registered job '{}' ({}) every {:?}.", job.name(), id, every);
        let registration = Registration { id, job, trigger };
        // `start` flips `started` under the same lock.
        let registration = {
            let mut pending = self.pending.lock();
            if self.started.load(Ordering::SeqCst) {
                Some(registration)
            } else {
                pending.push(registration);
                None
            }
        };
        if let Some(registration) = registration {
            self.spawn_loop(registration);
        }
        Ok(id)
    }

    async fn start(&self) -> Result<(), Error> {
        if self.is_shutdown() {
            return Err(Error::Scheduler("scheduler is shut down".into()));
        }
        let pending: Vec<Registration> = {
            let mut pending = self.pending.lock();
            if self.started.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            std::mem::take(&mut *pending)
        };
        info!("Scheduler started with {} job(s).", pending.len());
        for registration in pending {
            self.spawn_loop(registration);
        }
        Ok(())
    }

    async fn shutdown(&self, wait_for_jobs_to_complete: bool) -> Result<(), Error> {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            info!("Scheduler shutting down.");
        }
        self.stop.cancel();
        self.loops.close();
        self.executions.close();

        if !wait_for_jobs_to_complete {
            return Ok(());
        }
        let drained = tokio::time::timeout(self.drain_timeout, async {
            self.executions.wait().await;
            self.loops.wait().await;
        })
        .await;
        drained.map_err(|_| {
            Error::Scheduler(format!(
                "{} job execution(s) still running after {:?}",
                self.executions.len(),
                self.drain_timeout
            ))
        })
    }

    fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
