// tests/account_pool_tests.rs

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use titan_core::accounts::{load_index, AccountPool, PoolConfig, ReleaseOutcome};
use titan_core::models::{AccountIndex, AccountStatus, Action, CommendInfo};
use titan_core::session::AuthError;
use titan_core::test_utils::{credentials, steam_id, ActionScript, AuthScript, RecordingSessionFactory};
use titan_core::Error;

async fn ready_pool(factory: Arc<RecordingSessionFactory>, accounts: usize) -> Arc<AccountPool> {
    let pool = Arc::new(AccountPool::from_parts(
        factory,
        PoolConfig::default(),
        credentials(accounts),
        &AccountIndex::default(),
    ));
    pool.ensure_sessions().await;
    pool
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquire_never_shares_an_account() {
    let factory = Arc::new(RecordingSessionFactory::default());
    let pool = ready_pool(factory.clone(), 4).await;
    assert_eq!(pool.ready_count(), 4);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let action = Action::Commend(CommendInfo::default());
            let mut acquired = 0usize;
            for _ in 0..25 {
                if let Ok(lease) = pool.try_acquire() {
                    acquired += 1;
                    lease.perform(steam_id(1), &action).await.unwrap();
                    lease.release(ReleaseOutcome::Success);
                }
                tokio::task::yield_now().await;
            }
            acquired
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    assert!(total > 0);
    assert_eq!(factory.calls.overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(factory.calls.perform.load(Ordering::SeqCst), total);
    assert_eq!(pool.ready_count(), 4);

    let offsets: u64 = pool.snapshot_index().entries.iter().map(|e| e.last_offset).sum();
    assert_eq!(offsets, total as u64);
}

#[tokio::test]
async fn release_outcomes_drive_status() {
    let factory = Arc::new(RecordingSessionFactory::default());
    let pool = ready_pool(factory, 1).await;

    let lease = pool.try_acquire().unwrap();
    assert_eq!(pool.status_of("account0"), Some(AccountStatus::Busy));
    lease.release(ReleaseOutcome::Success);
    assert_eq!(pool.status_of("account0"), Some(AccountStatus::Ready));

    let lease = pool.try_acquire().unwrap();
    lease.release(ReleaseOutcome::NotAccountFault("target not found".into()));
    assert_eq!(pool.status_of("account0"), Some(AccountStatus::Ready));

    let lease = pool.try_acquire().unwrap();
    lease.release(ReleaseOutcome::Transient("rate limited".into()));
    assert_eq!(pool.status_of("account0"), Some(AccountStatus::Cooldown));
    assert!(matches!(pool.try_acquire(), Err(Error::AccountUnavailable)));

    // Cooldown outlives a sweep while its window is open.
    pool.ensure_sessions().await;
    assert_eq!(pool.status_of("account0"), Some(AccountStatus::Cooldown));
}

#[tokio::test]
async fn failed_account_is_never_reacquired_until_reset() {
    let factory = Arc::new(RecordingSessionFactory::default());
    factory.auth_for("account1", AuthScript::Fail(AuthError::GuardRequired));
    let pool = ready_pool(factory.clone(), 2).await;

    assert_eq!(pool.status_of("account1"), Some(AccountStatus::Failed));
    for _ in 0..5 {
        pool.ensure_sessions().await;
        let lease = pool.try_acquire().unwrap();
        assert_eq!(lease.username(), "account0");
        lease.release(ReleaseOutcome::Success);
    }
    // One login attempt each, no automatic retry of the failed one.
    assert_eq!(factory.calls.authenticate.load(Ordering::SeqCst), 2);

    factory.auth_for("account1", AuthScript::Succeed);
    assert!(pool.reset("account1").unwrap());
    let sweep = pool.ensure_sessions().await;
    assert_eq!(sweep.authenticated, 1);
    assert_eq!(pool.status_of("account1"), Some(AccountStatus::Ready));
    assert!(matches!(pool.reset("nobody"), Err(Error::NotFound(_))));
}

#[tokio::test]
async fn hanging_login_is_bounded() {
    let factory = Arc::new(RecordingSessionFactory::new(AuthScript::Hang, ActionScript::Succeed));
    let pool = Arc::new(AccountPool::from_parts(
        factory,
        PoolConfig { auth_timeout: Duration::from_millis(50), ..PoolConfig::default() },
        credentials(1),
        &AccountIndex::default(),
    ));
    let sweep = tokio::time::timeout(Duration::from_secs(2), pool.ensure_sessions())
        .await
        .expect("login sweep must not hang");
    assert_eq!(sweep.cooled_down, 1);
    assert_eq!(pool.status_of("account0"), Some(AccountStatus::Cooldown));
}

#[tokio::test]
async fn index_can_be_saved_while_accounts_are_busy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.json");
    let factory = Arc::new(RecordingSessionFactory::default());
    let pool = ready_pool(factory, 2).await;

    let held = pool.try_acquire().unwrap();
    pool.save_index(&path).await.unwrap();
    held.release(ReleaseOutcome::Success);

    let saved = load_index(&path).await.unwrap();
    assert_eq!(saved.len(), 2);
    assert_eq!(saved.get("account0").unwrap().status, AccountStatus::Busy);

    // A persisted Busy account comes back needing a fresh login.
    let restored = AccountPool::from_parts(
        Arc::new(RecordingSessionFactory::default()),
        PoolConfig::default(),
        credentials(2),
        &saved,
    );
    assert_eq!(restored.status_of("account0"), Some(AccountStatus::Unauthenticated));
}

#[tokio::test]
async fn removal_is_explicit() {
    let factory = Arc::new(RecordingSessionFactory::default());
    let pool = ready_pool(factory, 2).await;
    let generation = pool.generation();

    let lease = pool.try_acquire().unwrap();
    let name = lease.username().to_string();
    assert_eq!(pool.remove(&name).unwrap(), AccountStatus::Busy);
    // Releasing a removed account is harmless.
    lease.release(ReleaseOutcome::Success);

    assert_eq!(pool.len(), 1);
    assert!(pool.status_of(&name).is_none());
    assert!(pool.generation() > generation);
}
