//! src/orchestrator/mod.rs
//!
//! Turns one `ActionRequest` into per-account executions and aggregates
//! what happened. The restriction check is the only way in: nothing touches
//! an account before it passes.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use titan_common::models::{Action, ActionKind, ActionRequest, SteamId, VictimRecord};

use crate::accounts::{AccountLease, AccountPool, ReleaseOutcome, SessionSweep};
use crate::eventbus::{EventBus, TitanEvent};
use crate::restrictions::RestrictionGuard;
use crate::victims::VictimStore;
use crate::Error;

/// How many accounts one request may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// Every account that is `Ready` at dispatch time.
    All,
    Count(usize),
}

impl FanOut {
    fn limit(self) -> Option<usize> {
        match self {
            FanOut::All => None,
            FanOut::Count(n) => Some(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub report: FanOut,
    pub commend: FanOut,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            report: FanOut::All,
            commend: FanOut::Count(1),
        }
    }
}

impl DispatchPolicy {
    /// `None` for kinds that are never dispatched.
    pub fn fan_out(&self, kind: ActionKind) -> Option<FanOut> {
        match kind {
            ActionKind::Report => Some(self.report),
            ActionKind::Commend => Some(self.commend),
            ActionKind::Idle => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bound on one account's `perform_action` call.
    pub action_timeout: Duration,
    /// How long a request waits for an account that is mid-login or leased
    /// to another request before giving up.
    pub acquire_wait: Duration,
    pub policy: DispatchPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(30),
            acquire_wait: Duration::from_secs(30),
            policy: DispatchPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountResult {
    Succeeded,
    Failed { reason: String },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountExecution {
    pub username: String,
    pub result: AccountResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSummary {
    pub request_id: Uuid,
    pub target: SteamId,
    pub kind: ActionKind,
    /// Accounts the policy asked for.
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Requested slots no `Ready` account was available for.
    pub skipped: usize,
    pub executions: Vec<AccountExecution>,
}

impl ActionSummary {
    pub fn fully_failed(&self) -> bool {
        self.succeeded == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationResult {
    /// The target is restricted; no account was touched.
    Blocked { target: SteamId },
    Completed(ActionSummary),
}

pub struct Orchestrator {
    pool: Arc<AccountPool>,
    guard: Arc<RestrictionGuard>,
    victims: Arc<VictimStore>,
    events: EventBus,
    config: OrchestratorConfig,
    in_flight: TaskTracker,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        pool: Arc<AccountPool>,
        guard: Arc<RestrictionGuard>,
        victims: Arc<VictimStore>,
        events: EventBus,
        config: OrchestratorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pool,
            guard,
            victims,
            events,
            config,
            in_flight: TaskTracker::new(),
            shutdown,
        }
    }

    /// Pre-flight convenience for the operator surface.
    pub fn is_restricted(&self, target: &SteamId) -> bool {
        self.guard.is_restricted(target)
    }

    /// What we already know about a target. Submitting again is not refused.
    pub fn victim_record(&self, target: &SteamId) -> Option<VictimRecord> {
        self.victims.get(target)
    }

    pub async fn submit(&self, request: ActionRequest) -> Result<OrchestrationResult, Error> {
        // Taken before the cancellation check so a concurrent `drain` always
        // waits for this call.
        let _in_flight = self.in_flight.token();
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        if self.guard.is_restricted(&request.target) {
            info!("Request {} blocked: {} is restricted.", request.request_id, request.target);
            self.events
                .publish(TitanEvent::Blocked {
                    request_id: request.request_id,
                    target: request.target,
                })
                .await;
            return Ok(OrchestrationResult::Blocked { target: request.target });
        }

        let kind = request.kind();
        let policy_fan_out = self
            .config
            .policy
            .fan_out(kind)
            .ok_or_else(|| Error::UnsupportedAction(kind.to_string()))?;
        let fan_out = match request.max_accounts {
            Some(0) => return Err(Error::Parse("max_accounts must be at least 1".into())),
            Some(n) => FanOut::Count(n),
            None => policy_fan_out,
        };

        let sweep = self.pool.ensure_sessions().await;
        for (username, reason) in &sweep.failed {
            self.events
                .publish(TitanEvent::AccountFailed {
                    username: username.clone(),
                    reason: reason.clone(),
                })
                .await;
        }

        let mut leases = self.pool.acquire_many(fan_out.limit());
        if leases.is_empty() && self.pool.busy_count() + self.pool.ready_count() > 0 {
            // Another request holds the accounts or is still logging them in.
            debug!(
                "No account free for request {}; waiting up to {:?}.",
                request.request_id, self.config.acquire_wait
            );
            let waited = tokio::select! {
                res = self.pool.acquire_timeout(self.config.acquire_wait) => res,
                _ = self.shutdown.cancelled() => return Err(Error::ShuttingDown),
            };
            if let Ok(lease) = waited {
                leases.push(lease);
                leases.extend(self.pool.acquire_many(fan_out.limit().map(|n| n.saturating_sub(1))));
            }
        }
        if leases.is_empty() {
            warn!("No account ready for {} of {}.", kind, request.target);
            return Err(no_account_error(&sweep));
        }
        let requested = match fan_out {
            FanOut::All => self.pool.len().max(leases.len()),
            FanOut::Count(n) => n.max(leases.len()),
        };
        let skipped = requested - leases.len();
        info!(
            "Dispatching {} of {} to {} account(s) (request {}).",
            kind, request.target, leases.len(), request.request_id
        );

        let mut executions = JoinSet::new();
        for lease in leases {
            let action = request.action.clone();
            let target = request.target;
            let limit = self.config.action_timeout;
            executions.spawn(execute(lease, target, action, limit));
        }

        let mut summary = ActionSummary {
            request_id: request.request_id,
            target: request.target,
            kind,
            requested,
            succeeded: 0,
            failed: 0,
            skipped,
            executions: Vec::new(),
        };

        while let Some(joined) = executions.join_next().await {
            let (execution, account_failed) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("Account execution task failed: {}", e);
                    summary.failed += 1;
                    continue;
                }
            };
            match execution.result {
                AccountResult::Succeeded => summary.succeeded += 1,
                AccountResult::Failed { .. } | AccountResult::TimedOut => summary.failed += 1,
            }
            if let Some(reason) = account_failed {
                self.events
                    .publish(TitanEvent::AccountFailed {
                        username: execution.username.clone(),
                        reason,
                    })
                    .await;
            }
            summary.executions.push(execution);
        }
        summary.executions.sort_by(|a, b| a.username.cmp(&b.username));

        if summary.succeeded > 0 {
            let visits = self.victims.record_visit(request.target, Utc::now());
            debug!("{} now has {} recorded visit(s).", request.target, visits);
        }

        info!(
            "Request {} done: {} succeeded, {} failed, {} skipped.",
            request.request_id, summary.succeeded, summary.failed, summary.skipped
        );
        self.events.publish(TitanEvent::ActionFinished(summary.clone())).await;
        Ok(OrchestrationResult::Completed(summary))
    }

    /// Stops taking new work and waits (bounded) until every `submit` call
    /// has returned. Returns false on timeout.
    pub async fn drain(&self, wait: Duration) -> bool {
        self.in_flight.close();
        let pending = self.in_flight.len();
        if pending > 0 {
            info!("Waiting for {} in-flight request(s)...", pending);
        }
        tokio::time::timeout(wait, self.in_flight.wait()).await.is_ok()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn pool(&self) -> &Arc<AccountPool> {
        &self.pool
    }
}

/// Why a request found no account. Logins attempted by this very request
/// that all went wrong are reported as such; otherwise the pool was simply
/// exhausted.
fn no_account_error(sweep: &SessionSweep) -> Error {
    if sweep.authenticated > 0 {
        return Error::AccountUnavailable;
    }
    if !sweep.failed.is_empty() {
        let names: Vec<&str> = sweep.failed.iter().map(|(name, _)| name.as_str()).collect();
        let (_, first_reason) = &sweep.failed[0];
        return Error::Authentication(format!(
            "{} account(s) could not log in ({}): {}",
            names.len(),
            names.join(", "),
            first_reason
        ));
    }
    if sweep.cooled_down > 0 {
        return Error::TransientAction(format!(
            "{} login(s) failed transiently; the accounts are cooling down",
            sweep.cooled_down
        ));
    }
    Error::AccountUnavailable
}

/// Runs one account's share of a request and releases the account.
/// The second value is set when the account was just marked `Failed`.
async fn execute(
    lease: AccountLease,
    target: SteamId,
    action: Action,
    limit: Duration,
) -> (AccountExecution, Option<String>) {
    let username = lease.username().to_string();
    let attempt = AssertUnwindSafe(lease.perform(target, &action)).catch_unwind();

    let (result, outcome) = match tokio::time::timeout(limit, attempt).await {
        Ok(Ok(Ok(()))) => (AccountResult::Succeeded, ReleaseOutcome::Success),
        Ok(Ok(Err(failure))) => {
            let outcome = ReleaseOutcome::from(&failure);
            debug!("Account '{}' failed {} on {}: {}", username, action.kind(), target, failure);
            (AccountResult::Failed { reason: failure.to_string() }, outcome)
        }
        Ok(Err(_)) => {
            error!("Account '{}' panicked while acting on {}.", username, target);
            let reason = "session panicked".to_string();
            (AccountResult::Failed { reason: reason.clone() }, ReleaseOutcome::Transient(reason))
        }
        Err(_) => {
            warn!("Account '{}' timed out after {:?} acting on {}.", username, limit, target);
            (AccountResult::TimedOut, ReleaseOutcome::Transient(format!("timed out after {:?}", limit)))
        }
    };

    let account_failed = match &outcome {
        ReleaseOutcome::Permanent(reason) => Some(reason.clone()),
        _ => None,
    };
    lease.release(outcome);
    (AccountExecution { username, result }, account_failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use titan_common::models::{AccountCredentials, AccountIndex, AccountStatus, CommendInfo, IdleInfo, ReportInfo};
    use crate::accounts::PoolConfig;
    use crate::session::{ActionFailure, MockSessionClient, MockSessionFactory, SessionFactory};
    use crate::test_utils::{steam_id, MemoryRestrictionSource};

    fn creds(names: &[&str]) -> Vec<AccountCredentials> {
        names
            .iter()
            .map(|n| AccountCredentials {
                username: n.to_string(),
                password: "pw".into(),
                sentry: false,
                enabled: true,
            })
            .collect()
    }

    async fn orchestrator(
        factory: Arc<dyn SessionFactory>,
        names: &[&str],
        restricted: Vec<SteamId>,
    ) -> Orchestrator {
        let pool = Arc::new(AccountPool::from_parts(
            factory,
            PoolConfig::default(),
            creds(names),
            &AccountIndex::default(),
        ));
        let guard = RestrictionGuard::new(Arc::new(MemoryRestrictionSource::with(restricted)));
        guard.refresh().await.unwrap();
        Orchestrator::new(
            pool,
            Arc::new(guard),
            Arc::new(VictimStore::new()),
            EventBus::new(),
            OrchestratorConfig {
                action_timeout: Duration::from_millis(200),
                acquire_wait: Duration::from_millis(200),
                policy: DispatchPolicy::default(),
            },
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn restricted_target_never_opens_a_session() {
        let mut factory = MockSessionFactory::new();
        factory.expect_open().times(0);
        let orch = orchestrator(Arc::new(factory), &["a"], vec![steam_id(1)]).await;

        let result = orch
            .submit(ActionRequest::report(steam_id(1), ReportInfo::default()))
            .await
            .unwrap();
        assert_eq!(result, OrchestrationResult::Blocked { target: steam_id(1) });
        assert!(orch.victim_record(&steam_id(1)).is_none());
    }

    #[tokio::test]
    async fn per_account_failures_map_to_states() {
        let mut factory = MockSessionFactory::new();
        factory.expect_open().returning(|c| {
            let name = c.username.clone();
            let mut session = MockSessionClient::new();
            session.expect_authenticate().returning(|| Ok(()));
            session.expect_perform_action().returning(move |_, _| match name.as_str() {
                "expired" => Err(ActionFailure::AuthExpired("logged out".into())),
                "limited" => Err(ActionFailure::RateLimited("slow down".into())),
                "gone" => Err(ActionFailure::TargetNotFound),
                _ => Ok(()),
            });
            Box::new(session)
        });
        let orch = orchestrator(Arc::new(factory), &["ok", "expired", "limited", "gone"], vec![]).await;

        let result = orch
            .submit(ActionRequest::report(steam_id(2), ReportInfo::default()))
            .await
            .unwrap();
        let OrchestrationResult::Completed(summary) = result else {
            panic!("expected a completed result");
        };
        assert_eq!(summary.requested, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.skipped, 0);

        let pool = orch.pool();
        assert_eq!(pool.status_of("ok"), Some(AccountStatus::Ready));
        assert_eq!(pool.status_of("expired"), Some(AccountStatus::Failed));
        assert_eq!(pool.status_of("limited"), Some(AccountStatus::Cooldown));
        assert_eq!(pool.status_of("gone"), Some(AccountStatus::Ready));
        assert_eq!(orch.victim_record(&steam_id(2)).unwrap().visits, 1);
    }

    #[tokio::test]
    async fn all_accounts_failing_records_no_visit() {
        let mut factory = MockSessionFactory::new();
        factory.expect_open().returning(|_| {
            let mut session = MockSessionClient::new();
            session.expect_authenticate().returning(|| Ok(()));
            session
                .expect_perform_action()
                .returning(|_, _| Err(ActionFailure::Network("reset".into())));
            Box::new(session)
        });
        let orch = orchestrator(Arc::new(factory), &["a", "b"], vec![]).await;

        let result = orch
            .submit(ActionRequest::commend(steam_id(3), CommendInfo::default()).with_max_accounts(3))
            .await
            .unwrap();
        let OrchestrationResult::Completed(summary) = result else {
            panic!("expected a completed result");
        };
        assert!(summary.fully_failed());
        assert_eq!(summary.skipped, 1);
        assert!(orch.victim_record(&steam_id(3)).is_none());
    }

    #[tokio::test]
    async fn idle_is_rejected_after_the_gate() {
        let mut factory = MockSessionFactory::new();
        factory.expect_open().times(0);
        let orch = orchestrator(Arc::new(factory), &["a"], vec![steam_id(9)]).await;

        let idle = ActionRequest::new(steam_id(4), Action::Idle(IdleInfo::default()));
        assert!(matches!(orch.submit(idle).await, Err(Error::UnsupportedAction(_))));

        // Restricted targets are still reported as blocked first.
        let idle = ActionRequest::new(steam_id(9), Action::Idle(IdleInfo::default()));
        assert!(matches!(orch.submit(idle).await, Ok(OrchestrationResult::Blocked { .. })));
    }

    #[tokio::test]
    async fn submit_after_cancellation_is_refused() {
        let factory = MockSessionFactory::new();
        let orch = orchestrator(Arc::new(factory), &["a"], vec![]).await;
        orch.shutdown.cancel();
        let res = orch.submit(ActionRequest::commend(steam_id(5), CommendInfo::default())).await;
        assert!(matches!(res, Err(Error::ShuttingDown)));
        assert!(orch.drain(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn zero_max_accounts_is_rejected() {
        let mut factory = MockSessionFactory::new();
        factory.expect_open().times(0);
        let orch = orchestrator(Arc::new(factory), &["a"], vec![]).await;

        let request = ActionRequest::commend(steam_id(6), CommendInfo::default()).with_max_accounts(0);
        assert!(matches!(orch.submit(request).await, Err(Error::Parse(_))));
        assert_eq!(orch.pool().status_of("a"), Some(AccountStatus::Unauthenticated));
    }

    #[test]
    fn empty_pool_reason_follows_the_login_sweep() {
        let mut sweep = SessionSweep::default();
        assert!(matches!(no_account_error(&sweep), Error::AccountUnavailable));

        sweep.cooled_down = 1;
        assert!(matches!(no_account_error(&sweep), Error::TransientAction(_)));

        sweep.failed.push(("a".into(), "wrong password".into()));
        match no_account_error(&sweep) {
            Error::Authentication(msg) => assert!(msg.contains("a") && msg.contains("wrong password")),
            other => panic!("expected an authentication error, got {:?}", other),
        }

        sweep.authenticated = 1;
        assert!(matches!(no_account_error(&sweep), Error::AccountUnavailable));
    }
}
