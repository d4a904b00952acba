// tests/orchestration_tests.rs

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use titan_core::accounts::{AccountPool, PoolConfig};
use titan_core::eventbus::{EventBus, TitanEvent};
use titan_core::models::{
    AccountIndex, AccountStatus, ActionRequest, CommendInfo, ReportInfo, SteamId,
};
use titan_core::orchestrator::{
    AccountResult, DispatchPolicy, FanOut, OrchestrationResult, Orchestrator, OrchestratorConfig,
};
use titan_core::restrictions::RestrictionGuard;
use titan_core::session::{ActionFailure, AuthError};
use titan_core::test_utils::{
    credentials, steam_id, ActionScript, AuthScript, MemoryRestrictionSource, RecordingSessionFactory,
};
use titan_core::victims::VictimStore;
use titan_core::Error;
use tokio_util::sync::CancellationToken;

struct Fixture {
    factory: Arc<RecordingSessionFactory>,
    pool: Arc<AccountPool>,
    victims: Arc<VictimStore>,
    events: EventBus,
    orchestrator: Arc<Orchestrator>,
}

async fn fixture(
    factory: RecordingSessionFactory,
    accounts: usize,
    restricted: Vec<SteamId>,
    config: OrchestratorConfig,
) -> Fixture {
    let factory = Arc::new(factory);
    let pool = Arc::new(AccountPool::from_parts(
        factory.clone(),
        PoolConfig::default(),
        credentials(accounts),
        &AccountIndex::default(),
    ));
    let guard = Arc::new(RestrictionGuard::new(Arc::new(MemoryRestrictionSource::with(restricted))));
    guard.refresh().await.unwrap();
    let victims = Arc::new(VictimStore::new());
    let events = EventBus::new();
    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        guard,
        victims.clone(),
        events.clone(),
        config,
        CancellationToken::new(),
    ));
    Fixture { factory, pool, victims, events, orchestrator }
}

fn completed(result: OrchestrationResult) -> titan_core::orchestrator::ActionSummary {
    match result {
        OrchestrationResult::Completed(summary) => summary,
        other => panic!("expected Completed, got {:?}", other),
    }
}

#[tokio::test]
async fn blocked_target_touches_no_session() {
    let target = steam_id(42);
    let fx = fixture(RecordingSessionFactory::default(), 3, vec![target], OrchestratorConfig::default()).await;
    let mut rx = fx.events.subscribe(None).await;

    let report = ActionRequest::report(target, ReportInfo { aim_hacking: true, ..Default::default() });
    let result = assert_ok!(fx.orchestrator.submit(report).await);

    assert_eq!(result, OrchestrationResult::Blocked { target });
    assert_eq!(fx.factory.calls.total(), 0);
    assert!(fx.victims.get(&target).is_none());
    assert!(matches!(rx.try_recv(), Ok(TitanEvent::Blocked { .. })));
}

#[tokio::test]
async fn unavailable_restriction_list_blocks_everything() {
    let factory = Arc::new(RecordingSessionFactory::default());
    let pool = Arc::new(AccountPool::from_parts(
        factory.clone(),
        PoolConfig::default(),
        credentials(1),
        &AccountIndex::default(),
    ));
    let guard = Arc::new(RestrictionGuard::new(Arc::new(MemoryRestrictionSource::failing())));
    assert_err!(guard.refresh().await);
    let orchestrator = Orchestrator::new(
        pool,
        guard,
        Arc::new(VictimStore::new()),
        EventBus::new(),
        OrchestratorConfig::default(),
        CancellationToken::new(),
    );

    let result = orchestrator
        .submit(ActionRequest::commend(steam_id(1), CommendInfo::default()))
        .await
        .unwrap();
    assert!(matches!(result, OrchestrationResult::Blocked { .. }));
    assert_eq!(factory.calls.total(), 0);
}

#[tokio::test]
async fn refused_logins_surface_as_authentication_error() {
    let factory = RecordingSessionFactory::new(
        AuthScript::Fail(AuthError::InvalidCredentials("bad password".into())),
        ActionScript::Succeed,
    );
    let fx = fixture(factory, 2, vec![], OrchestratorConfig::default()).await;
    let mut rx = fx.events.subscribe(None).await;

    let res = fx
        .orchestrator
        .submit(ActionRequest::report(steam_id(7), ReportInfo::default()))
        .await;
    match res {
        Err(Error::Authentication(msg)) => assert!(msg.contains("account0") && msg.contains("account1")),
        other => panic!("expected an authentication error, got {:?}", other),
    }
    assert!(fx.victims.is_empty());
    assert_eq!(fx.factory.calls.perform.load(Ordering::SeqCst), 0);

    // Both accounts were announced as failed.
    let mut failed = 0;
    while let Ok(event) = rx.try_recv() {
        if let TitanEvent::AccountFailed { .. } = event {
            failed += 1;
        }
    }
    assert_eq!(failed, 2);
    assert_eq!(fx.pool.status_of("account0"), Some(AccountStatus::Failed));

    // Nothing is retried automatically; the next request finds an empty pool.
    let res = fx
        .orchestrator
        .submit(ActionRequest::report(steam_id(7), ReportInfo::default()))
        .await;
    assert!(matches!(res, Err(Error::AccountUnavailable)));
}

#[tokio::test]
async fn timed_out_logins_surface_as_transient_error() {
    let factory = RecordingSessionFactory::new(AuthScript::Hang, ActionScript::Succeed);
    let factory = Arc::new(factory);
    let pool = Arc::new(AccountPool::from_parts(
        factory.clone(),
        PoolConfig { auth_timeout: Duration::from_millis(50), ..PoolConfig::default() },
        credentials(1),
        &AccountIndex::default(),
    ));
    let guard = Arc::new(RestrictionGuard::new(Arc::new(MemoryRestrictionSource::with(vec![]))));
    guard.refresh().await.unwrap();
    let orchestrator = Orchestrator::new(
        pool.clone(),
        guard,
        Arc::new(VictimStore::new()),
        EventBus::new(),
        OrchestratorConfig::default(),
        CancellationToken::new(),
    );

    let res = orchestrator
        .submit(ActionRequest::commend(steam_id(7), CommendInfo::default()))
        .await;
    assert!(matches!(res, Err(Error::TransientAction(_))));
    assert_eq!(pool.status_of("account0"), Some(AccountStatus::Cooldown));
    assert_eq!(factory.calls.perform.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn commend_with_one_account_counts_one_visit() {
    let fx = fixture(RecordingSessionFactory::default(), 1, vec![], OrchestratorConfig::default()).await;
    let target = steam_id(8);

    let summary = completed(
        fx.orchestrator
            .submit(ActionRequest::commend(target, CommendInfo { friendly: true, ..Default::default() }))
            .await
            .unwrap(),
    );
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(fx.pool.status_of("account0"), Some(AccountStatus::Ready));
    assert_eq!(fx.victims.get(&target).unwrap().visits, 1);

    // Resubmitting is not deduplicated.
    fx.orchestrator
        .submit(ActionRequest::commend(target, CommendInfo::default()))
        .await
        .unwrap();
    assert_eq!(fx.victims.get(&target).unwrap().visits, 2);
}

#[tokio::test]
async fn timed_out_session_goes_to_cooldown_and_submit_returns() {
    let factory = RecordingSessionFactory::default();
    factory.action_for("account1", ActionScript::Hang);
    let config = OrchestratorConfig {
        action_timeout: Duration::from_millis(100),
        ..OrchestratorConfig::default()
    };
    let fx = fixture(factory, 2, vec![], config).await;

    let submit = fx.orchestrator.submit(ActionRequest::report(steam_id(9), ReportInfo::default()));
    let summary = completed(
        tokio::time::timeout(Duration::from_secs(5), submit)
            .await
            .expect("submit must be bounded")
            .unwrap(),
    );

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    let timed_out = summary
        .executions
        .iter()
        .find(|e| e.username == "account1")
        .unwrap();
    assert_eq!(timed_out.result, AccountResult::TimedOut);
    assert_eq!(fx.pool.status_of("account1"), Some(AccountStatus::Cooldown));
    assert_eq!(fx.pool.status_of("account0"), Some(AccountStatus::Ready));
}

#[tokio::test]
async fn sibling_failures_do_not_abort_each_other() {
    let factory = RecordingSessionFactory::default();
    factory.action_for("account0", ActionScript::Fail(ActionFailure::Network("reset".into())));
    factory.action_for("account1", ActionScript::Fail(ActionFailure::AuthExpired("kicked".into())));
    let fx = fixture(factory, 4, vec![], OrchestratorConfig::default()).await;

    let summary = completed(
        fx.orchestrator
            .submit(ActionRequest::report(steam_id(10), ReportInfo::default()))
            .await
            .unwrap(),
    );
    assert_eq!(summary.requested, 4);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(fx.factory.calls.perform.load(Ordering::SeqCst), 4);
    assert_eq!(fx.pool.status_of("account0"), Some(AccountStatus::Cooldown));
    assert_eq!(fx.pool.status_of("account1"), Some(AccountStatus::Failed));
    assert_eq!(fx.victims.get(&steam_id(10)).unwrap().visits, 1);
}

#[tokio::test]
async fn report_fan_out_follows_policy_and_override() {
    let config = OrchestratorConfig {
        policy: DispatchPolicy { report: FanOut::Count(2), commend: FanOut::Count(1) },
        ..OrchestratorConfig::default()
    };
    let fx = fixture(RecordingSessionFactory::default(), 5, vec![], config).await;

    let summary = completed(
        fx.orchestrator
            .submit(ActionRequest::report(steam_id(11), ReportInfo::default()))
            .await
            .unwrap(),
    );
    assert_eq!(summary.succeeded, 2);

    let summary = completed(
        fx.orchestrator
            .submit(ActionRequest::report(steam_id(11), ReportInfo::default()).with_max_accounts(8))
            .await
            .unwrap(),
    );
    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.skipped, 3);
    // Least-used accounts went first, so the load is spread.
    let offsets: Vec<u64> = fx.pool.snapshot_index().entries.iter().map(|e| e.last_offset).collect();
    assert_eq!(offsets.iter().sum::<u64>(), 7);
    assert!(offsets.iter().all(|o| *o >= 1 && *o <= 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_lose_no_visits() {
    let fx = fixture(RecordingSessionFactory::default(), 6, vec![], OrchestratorConfig {
        policy: DispatchPolicy { report: FanOut::Count(1), commend: FanOut::Count(1) },
        ..OrchestratorConfig::default()
    })
    .await;
    let target = steam_id(12);

    let mut handles = Vec::new();
    for _ in 0..6 {
        let orchestrator = fx.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .submit(ActionRequest::commend(target, CommendInfo::default()))
                .await
        }));
    }
    let mut succeeded = 0u64;
    for handle in handles {
        let summary = completed(handle.await.unwrap().unwrap());
        assert_eq!(summary.succeeded, 1);
        succeeded += 1;
    }
    assert_eq!(succeeded, 6);
    assert_eq!(fx.victims.get(&target).unwrap().visits, succeeded);
    assert_eq!(fx.factory.calls.overlaps.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn overlapping_commends_wait_for_logins_in_flight() {
    let factory = RecordingSessionFactory::new(
        AuthScript::Delay(Duration::from_millis(100)),
        ActionScript::Succeed,
    );
    let fx = fixture(factory, 2, vec![], OrchestratorConfig {
        acquire_wait: Duration::from_secs(5),
        ..OrchestratorConfig::default()
    })
    .await;

    let first = {
        let orchestrator = fx.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .submit(ActionRequest::commend(steam_id(13), CommendInfo::default()))
                .await
        })
    };
    // Lands while the first request's logins are still running.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = fx
        .orchestrator
        .submit(ActionRequest::commend(steam_id(14), CommendInfo::default()))
        .await;

    let second = completed(assert_ok!(second));
    let first = completed(assert_ok!(first.await.unwrap()));
    assert_eq!(first.succeeded, 1);
    assert_eq!(second.succeeded, 1);
    assert_ne!(first.executions[0].username, second.executions[0].username);
    // Logins were not repeated by the second request.
    assert_eq!(fx.factory.calls.authenticate.load(Ordering::SeqCst), 2);
    assert_eq!(fx.victims.get(&steam_id(13)).unwrap().visits, 1);
    assert_eq!(fx.victims.get(&steam_id(14)).unwrap().visits, 1);
}

#[tokio::test]
async fn waiting_for_an_account_is_bounded() {
    let factory = RecordingSessionFactory::default();
    let gate = Arc::new(tokio::sync::Notify::new());
    factory.action_for("account0", ActionScript::WaitFor(gate.clone()));
    let fx = fixture(factory, 1, vec![], OrchestratorConfig {
        acquire_wait: Duration::from_millis(50),
        ..OrchestratorConfig::default()
    })
    .await;

    let holder = {
        let orchestrator = fx.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .submit(ActionRequest::commend(steam_id(15), CommendInfo::default()))
                .await
        })
    };
    while fx.factory.calls.perform.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let res = fx
        .orchestrator
        .submit(ActionRequest::commend(steam_id(16), CommendInfo::default()))
        .await;
    assert!(matches!(res, Err(Error::AccountUnavailable)));

    gate.notify_one();
    assert_eq!(completed(holder.await.unwrap().unwrap()).succeeded, 1);
}
