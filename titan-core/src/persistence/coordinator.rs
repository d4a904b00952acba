//! Graceful shutdown and state flushing.
//!
//! Order matters: the scheduler stops first, then every outstanding
//! `submit` call must return before the account index is written, otherwise
//! a `Busy` account would be saved mid-action. Each step is best-effort; a
//! failed step is recorded and the sequence continues.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use titan_common::traits::{JobScheduler, WebCache};

use crate::accounts::AccountPool;
use crate::eventbus::{EventBus, TitanEvent};
use crate::orchestrator::Orchestrator;
use crate::victims::VictimStore;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    StopScheduler,
    DrainOrchestrator,
    FlushAccountIndex,
    FlushVictims,
    FlushWebCache,
    RefreshAccountIndex,
}

impl fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownStep::StopScheduler => "stop scheduler",
            ShutdownStep::DrainOrchestrator => "drain orchestrator",
            ShutdownStep::FlushAccountIndex => "flush account index",
            ShutdownStep::FlushVictims => "flush victims",
            ShutdownStep::FlushWebCache => "flush web cache",
            ShutdownStep::RefreshAccountIndex => "re-flush account index",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: ShutdownStep,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub completed: Vec<ShutdownStep>,
    pub failures: Vec<StepFailure>,
    /// How many times the account index was written (1 or 2).
    pub index_flushes: usize,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    pub scheduler_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            scheduler_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistencePaths {
    pub index: PathBuf,
    pub victims: PathBuf,
}

pub struct PersistenceCoordinator {
    token: CancellationToken,
    scheduler: Arc<dyn JobScheduler>,
    orchestrator: Arc<Orchestrator>,
    pool: Arc<AccountPool>,
    victims: Arc<VictimStore>,
    web_cache: Arc<dyn WebCache>,
    events: EventBus,
    paths: PersistencePaths,
    config: ShutdownConfig,
    report: OnceCell<ShutdownReport>,
}

impl PersistenceCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        token: CancellationToken,
        scheduler: Arc<dyn JobScheduler>,
        orchestrator: Arc<Orchestrator>,
        pool: Arc<AccountPool>,
        victims: Arc<VictimStore>,
        web_cache: Arc<dyn WebCache>,
        events: EventBus,
        paths: PersistencePaths,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            token,
            scheduler,
            orchestrator,
            pool,
            victims,
            web_cache,
            events,
            paths,
            config,
            report: OnceCell::new(),
        }
    }

    /// Runs the shutdown sequence once. Later (or concurrent) calls wait for
    /// and return the same report without touching any file again.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.report.get_or_init(|| self.run_sequence()).await.clone()
    }

    pub fn has_shut_down(&self) -> bool {
        self.report.initialized()
    }

    /// Writes the account index and victim history without stopping anything.
    pub async fn checkpoint(&self) -> Result<(), Error> {
        if self.has_shut_down() {
            return Err(Error::ShuttingDown);
        }
        self.pool.save_index(&self.paths.index).await?;
        self.victims.save(&self.paths.victims).await?;
        debug!("Checkpoint written.");
        Ok(())
    }

    async fn run_sequence(&self) -> ShutdownReport {
        info!("Shutting down...");
        self.token.cancel();
        let mut report = ShutdownReport::default();

        // 1) scheduler: no new triggers, wait for running jobs
        let stopped = if self.scheduler.is_shutdown() {
            Ok(())
        } else {
            match tokio::time::timeout(self.config.scheduler_timeout, self.scheduler.shutdown(true)).await {
                Ok(res) => res,
                Err(_) => Err(Error::Scheduler(format!(
                    "did not stop within {:?}", self.config.scheduler_timeout
                ))),
            }
        };
        record(&mut report, ShutdownStep::StopScheduler, stopped);

        // every outstanding submit has to return before the index is written
        let drained = if self.orchestrator.drain(self.config.drain_timeout).await {
            Ok(())
        } else {
            Err(Error::persistence(
                "drain orchestrator",
                format!(
                    "{} request(s) still running after {:?}",
                    self.orchestrator.in_flight(),
                    self.config.drain_timeout
                ),
            ))
        };
        record(&mut report, ShutdownStep::DrainOrchestrator, drained);

        // 2) account index
        let generation = self.pool.generation();
        let flushed = self.pool.save_index(&self.paths.index).await;
        if flushed.is_ok() {
            report.index_flushes += 1;
        }
        record(&mut report, ShutdownStep::FlushAccountIndex, flushed);

        // 3) victims
        let flushed = self.victims.save(&self.paths.victims).await;
        record(&mut report, ShutdownStep::FlushVictims, flushed);

        // 4) web cache
        let flushed = self.web_cache.save().await;
        record(&mut report, ShutdownStep::FlushWebCache, flushed);

        // 5) accounts released after step 2 (late drains) need another write
        if self.pool.generation() != generation {
            info!("Account state changed during shutdown; writing index again.");
            let flushed = self.pool.save_index(&self.paths.index).await;
            if flushed.is_ok() {
                report.index_flushes += 1;
            }
            record(&mut report, ShutdownStep::RefreshAccountIndex, flushed);
        }

        if report.is_clean() {
            info!("Shutdown finished; all state written.");
        } else {
            for failure in &report.failures {
                error!("Shutdown step '{}' failed: {}", failure.step, failure.reason);
            }
        }
        self.events
            .publish(TitanEvent::ShutdownComplete { failures: report.failures.clone() })
            .await;
        self.events.shutdown();
        report
    }
}

fn record(report: &mut ShutdownReport, step: ShutdownStep, result: Result<(), Error>) {
    match result {
        Ok(()) => {
            debug!("Shutdown step '{}' done.", step);
            report.completed.push(step);
        }
        Err(e) => {
            warn!("Shutdown step '{}' failed: {}", step, e);
            report.failures.push(StepFailure { step, reason: e.to_string() });
        }
    }
}
