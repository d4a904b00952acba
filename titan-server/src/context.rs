//! titan-server/src/context.rs
//!
//! Builds every long-lived component of the process (ServerContext).

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use titan_common::traits::{BanLookup, JobScheduler, RestrictionSource, WebCache};
use titan_core::accounts::{load_accounts_file, load_index, AccountPool, PoolConfig};
use titan_core::eventbus::EventBus;
use titan_core::orchestrator::{Orchestrator, OrchestratorConfig};
use titan_core::persistence::{PersistenceCoordinator, PersistencePaths, ShutdownConfig};
use titan_core::restrictions::{FileRestrictionSource, HttpRestrictionSource, RestrictionGuard};
use titan_core::scheduler::IntervalScheduler;
use titan_core::session::dummy::DummySessionFactory;
use titan_core::session::SessionFactory;
use titan_core::tasks::{TrackingConfig, VictimTrackingJob};
use titan_core::victims::VictimStore;
use titan_core::web::{FileWebCache, SteamWebApi};
use titan_core::Error;

use crate::Args;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const STEAM_API_KEY_ENV: &str = "TITAN_STEAM_API_KEY";

pub struct ServerContext {
    pub shutdown_token: CancellationToken,
    pub event_bus: EventBus,
    pub pool: Arc<AccountPool>,
    pub guard: Arc<RestrictionGuard>,
    pub victims: Arc<VictimStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Arc<IntervalScheduler>,
    pub tracking_job: Arc<VictimTrackingJob>,
    pub tracking_config: TrackingConfig,
    pub coordinator: PersistenceCoordinator,
}

impl ServerContext {
    /// Loads all persisted state and wires the components together. Any
    /// error here means the process cannot run.
    pub async fn new(args: &Args) -> Result<Self, Error> {
        let factory = session_factory(args)?;

        // 1) accounts + index
        let credentials = load_accounts_file(&args.accounts_file).await?;
        let index = load_index(&args.index_file).await?;
        let pool_config = PoolConfig {
            cooldown: Duration::from_secs(args.cooldown_mins * 60),
            ..PoolConfig::default()
        };
        let pool = Arc::new(AccountPool::from_parts(factory, pool_config, credentials, &index));

        // 2) victim history and web cache
        let victims = Arc::new(
            VictimStore::load(&args.victims_file)
                .await
                .map_err(|e| Error::StartupFatal(format!("victim history: {e}")))?,
        );
        let web_cache = Arc::new(FileWebCache::new(&args.web_cache_file));
        if let Err(e) = web_cache.load().await {
            warn!("Web cache could not be loaded, starting empty: {}", e);
        }

        // 3) restriction list
        let guard = Arc::new(restriction_guard(args)?);

        let event_bus = EventBus::new();
        let shutdown_token = CancellationToken::new();

        let orchestrator_config = OrchestratorConfig {
            action_timeout: Duration::from_secs(args.action_timeout_secs),
            ..OrchestratorConfig::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(
            pool.clone(),
            guard.clone(),
            victims.clone(),
            event_bus.clone(),
            orchestrator_config,
            shutdown_token.clone(),
        ));

        // 4) background tracking
        let lookup: Option<Arc<dyn BanLookup>> = match SteamWebApi::from_cache(
            web_cache.as_ref(),
            std::env::var(STEAM_API_KEY_ENV).ok(),
            HTTP_TIMEOUT,
        )? {
            Some(api) => Some(Arc::new(api)),
            None => {
                info!("No Steam Web API key configured; ban tracking only prunes history.");
                None
            }
        };
        let tracking_config = TrackingConfig {
            interval: Duration::from_secs(args.tracking_interval_mins * 60),
            retention: Duration::from_secs(args.victim_retention_days * 24 * 3600),
            store_path: Some(args.victims_file.clone()),
        };
        let tracking_job = Arc::new(VictimTrackingJob::new(
            victims.clone(),
            lookup,
            event_bus.clone(),
            tracking_config.clone(),
        ));

        let shutdown_config = ShutdownConfig {
            drain_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            ..ShutdownConfig::default()
        };
        let scheduler = Arc::new(IntervalScheduler::new(shutdown_config.scheduler_timeout));

        let scheduler_dyn: Arc<dyn JobScheduler> = scheduler.clone();
        let cache_dyn: Arc<dyn WebCache> = web_cache.clone();
        let coordinator = PersistenceCoordinator::new(
            shutdown_token.clone(),
            scheduler_dyn,
            orchestrator.clone(),
            pool.clone(),
            victims.clone(),
            cache_dyn,
            event_bus.clone(),
            PersistencePaths {
                index: args.index_file.clone(),
                victims: args.victims_file.clone(),
            },
            shutdown_config,
        );

        Ok(Self {
            shutdown_token,
            event_bus,
            pool,
            guard,
            victims,
            orchestrator,
            scheduler,
            tracking_job,
            tracking_config,
            coordinator,
        })
    }
}

fn session_factory(args: &Args) -> Result<Arc<dyn SessionFactory>, Error> {
    if args.dummy {
        warn!("Running with dummy sessions; no action leaves this machine.");
        return Ok(Arc::new(DummySessionFactory::default()));
    }
    Err(Error::StartupFatal(
        "no network session client is built into this binary; run with --dummy".into(),
    ))
}

fn restriction_guard(args: &Args) -> Result<RestrictionGuard, Error> {
    if args.noblacklist {
        warn!("Blacklist disabled; every target is allowed.");
        return Ok(RestrictionGuard::disabled());
    }
    let source: Arc<dyn RestrictionSource> = match &args.blacklist_url {
        Some(url) => Arc::new(
            HttpRestrictionSource::new(url, HTTP_TIMEOUT)
                .map_err(|e| Error::StartupFatal(format!("blacklist url: {e}")))?,
        ),
        None => Arc::new(FileRestrictionSource::new(&args.blacklist_file)),
    };
    info!("Blacklist source: {}", source.describe());
    Ok(RestrictionGuard::new(source))
}
