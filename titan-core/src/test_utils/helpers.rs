// File: titan-core/src/test_utils/helpers.rs

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use titan_common::models::{AccountCredentials, AccountIndex, SteamId};
use titan_common::traits::{RestrictionSource, WebCache};

use crate::accounts::{AccountPool, PoolConfig};
use crate::eventbus::EventBus;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::persistence::{PersistenceCoordinator, PersistencePaths, ShutdownConfig};
use crate::restrictions::RestrictionGuard;
use crate::session::SessionFactory;
use crate::test_utils::ManualScheduler;
use crate::victims::VictimStore;

/// `n` enabled accounts named `account0`, `account1`, ...
pub fn credentials(n: usize) -> Vec<AccountCredentials> {
    (0..n)
        .map(|i| AccountCredentials {
            username: format!("account{i}"),
            password: format!("password{i}"),
            sentry: false,
            enabled: true,
        })
        .collect()
}

/// A valid individual SteamID derived from `n`.
pub fn steam_id(n: u32) -> SteamId {
    SteamId::from_account_id(n)
}

/// Every component wired together the way the server does it, with fakes
/// at the edges and state files under `dir`.
pub struct TestHarness {
    pub token: CancellationToken,
    pub pool: Arc<AccountPool>,
    pub guard: Arc<RestrictionGuard>,
    pub victims: Arc<VictimStore>,
    pub events: EventBus,
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Arc<ManualScheduler>,
    pub coordinator: PersistenceCoordinator,
    pub paths: PersistencePaths,
}

impl TestHarness {
    pub async fn new(
        dir: &Path,
        factory: Arc<dyn SessionFactory>,
        accounts: usize,
        restrictions: Arc<dyn RestrictionSource>,
        web_cache: Arc<dyn WebCache>,
        orchestrator_config: OrchestratorConfig,
        shutdown_config: ShutdownConfig,
    ) -> Self {
        let token = CancellationToken::new();
        let pool = Arc::new(AccountPool::from_parts(
            factory,
            PoolConfig::default(),
            credentials(accounts),
            &AccountIndex::default(),
        ));
        let guard = Arc::new(RestrictionGuard::new(restrictions));
        let _ = guard.refresh().await;
        let victims = Arc::new(VictimStore::new());
        let events = EventBus::new();
        let orchestrator = Arc::new(Orchestrator::new(
            pool.clone(),
            guard.clone(),
            victims.clone(),
            events.clone(),
            orchestrator_config,
            token.clone(),
        ));
        let scheduler = Arc::new(ManualScheduler::new());
        let paths = PersistencePaths {
            index: dir.join("index.json"),
            victims: dir.join("victims.json"),
        };
        let coordinator = PersistenceCoordinator::new(
            token.clone(),
            scheduler.clone(),
            orchestrator.clone(),
            pool.clone(),
            victims.clone(),
            web_cache,
            events.clone(),
            paths.clone(),
            shutdown_config,
        );
        Self {
            token,
            pool,
            guard,
            victims,
            events,
            orchestrator,
            scheduler,
            coordinator,
            paths,
        }
    }
}
