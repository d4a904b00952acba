// File: titan-core/src/accounts/pool.rs

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use titan_common::models::{
    AccountCredentials, AccountIndex, AccountIndexEntry, AccountStatus, Action, SteamId,
};

use crate::accounts::index::save_index;
use crate::session::{ActionFailure, AuthError, SessionClient, SessionFactory};
use crate::Error;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long an account sits in `Cooldown` after a transient failure.
    pub cooldown: Duration,
    /// Upper bound on one login attempt.
    pub auth_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(30 * 60),
            auth_timeout: Duration::from_secs(30),
        }
    }
}

/// How an account's turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Action went through; the account goes back to `Ready`.
    Success,
    /// The action failed for reasons unrelated to the account (target gone,
    /// request rejected). Back to `Ready`.
    NotAccountFault(String),
    /// Rate limit, network error, timeout. Account goes to `Cooldown`.
    Transient(String),
    /// Authentication or other permanent failure. Account goes to `Failed`
    /// until reset by hand.
    Permanent(String),
}

impl From<&ActionFailure> for ReleaseOutcome {
    fn from(failure: &ActionFailure) -> Self {
        match failure {
            ActionFailure::AuthExpired(_) => ReleaseOutcome::Permanent(failure.to_string()),
            ActionFailure::RateLimited(_) | ActionFailure::Network(_) => {
                ReleaseOutcome::Transient(failure.to_string())
            }
            ActionFailure::TargetNotFound | ActionFailure::Rejected(_) => {
                ReleaseOutcome::NotAccountFault(failure.to_string())
            }
        }
    }
}

/// Result of `AccountPool::ensure_sessions`.
#[derive(Debug, Default, Clone)]
pub struct SessionSweep {
    pub authenticated: usize,
    pub cooled_down: usize,
    pub cooldowns_expired: usize,
    /// (username, reason) for accounts that just went to `Failed`.
    pub failed: Vec<(String, String)>,
}

enum LoginSettled {
    Ready,
    Deferred,
    Failed(String),
}

struct AccountSlot {
    credentials: AccountCredentials,
    order: usize,
    status: AccountStatus,
    /// Present exactly while the account is `Ready`; moves into the lease while `Busy`.
    session: Option<Box<dyn SessionClient>>,
    last_offset: u64,
    cooldown_until: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl AccountSlot {
    fn restore(credentials: AccountCredentials, order: usize, entry: Option<&AccountIndexEntry>) -> Self {
        let now = Utc::now();
        let mut slot = AccountSlot {
            credentials,
            order,
            status: AccountStatus::Unauthenticated,
            session: None,
            last_offset: 0,
            cooldown_until: None,
            last_error: None,
        };
        if let Some(entry) = entry {
            slot.last_offset = entry.last_offset;
            slot.last_error = entry.last_error.clone();
            match entry.status {
                AccountStatus::Failed => slot.status = AccountStatus::Failed,
                AccountStatus::Cooldown => {
                    if let Some(until) = entry.cooldown_until.filter(|until| *until > now) {
                        slot.status = AccountStatus::Cooldown;
                        slot.cooldown_until = Some(until);
                    }
                }
                // Sessions never survive a restart.
                AccountStatus::Ready | AccountStatus::Busy | AccountStatus::Unauthenticated => {}
            }
        }
        slot
    }

    fn index_entry(&self) -> AccountIndexEntry {
        AccountIndexEntry {
            username: self.credentials.username.clone(),
            status: self.status,
            last_offset: self.last_offset,
            cooldown_until: self.cooldown_until,
            last_error: self.last_error.clone(),
        }
    }
}

/// Owns every account, its state and its session, and hands accounts out
/// one caller at a time.
///
/// Each account lives in its own `DashMap` entry; every state transition
/// happens under that entry's lock and never across an `.await`, so callers
/// only ever observe whole transitions.
pub struct AccountPool {
    accounts: DashMap<String, AccountSlot>,
    factory: Arc<dyn SessionFactory>,
    config: PoolConfig,
    next_order: AtomicUsize,
    generation: AtomicU64,
    released: Notify,
}

impl AccountPool {
    pub fn new(factory: Arc<dyn SessionFactory>, config: PoolConfig) -> Self {
        Self {
            accounts: DashMap::new(),
            factory,
            config,
            next_order: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            released: Notify::new(),
        }
    }

    /// Builds a pool from the accounts file contents and the persisted index.
    pub fn from_parts(
        factory: Arc<dyn SessionFactory>,
        config: PoolConfig,
        credentials: Vec<AccountCredentials>,
        index: &AccountIndex,
    ) -> Self {
        let pool = Self::new(factory, config);
        for creds in credentials {
            let entry = index.get(&creds.username);
            pool.add_account(creds, entry);
        }
        let stale = index
            .entries
            .iter()
            .filter(|e| !pool.accounts.contains_key(&e.username))
            .count();
        if stale > 0 {
            info!("Dropped {} index entries for accounts no longer in the accounts file.", stale);
        }
        pool
    }

    pub fn add_account(&self, credentials: AccountCredentials, entry: Option<&AccountIndexEntry>) {
        let username = credentials.username.clone();
        let order = self.next_order.fetch_add(1, Ordering::SeqCst);
        let slot = AccountSlot::restore(credentials, order, entry);
        debug!("Account '{}' added to pool as {}.", username, slot.status);
        self.accounts.insert(username, slot);
        self.bump();
    }

    /// Explicitly removes an account. A lease still out for it is simply
    /// dropped when released.
    pub fn remove(&self, username: &str) -> Result<AccountStatus, Error> {
        let (_, slot) = self
            .accounts
            .remove(username)
            .ok_or_else(|| Error::NotFound(format!("account '{}'", username)))?;
        self.bump();
        info!("Account '{}' removed from pool (was {}).", username, slot.status);
        Ok(slot.status)
    }

    /// Manual reset of a `Failed` (or cooling down) account. Returns whether
    /// anything changed.
    pub fn reset(&self, username: &str) -> Result<bool, Error> {
        let mut slot = self
            .accounts
            .get_mut(username)
            .ok_or_else(|| Error::NotFound(format!("account '{}'", username)))?;
        match slot.status {
            AccountStatus::Failed | AccountStatus::Cooldown => {
                slot.status = AccountStatus::Unauthenticated;
                slot.cooldown_until = None;
                slot.last_error = None;
                drop(slot);
                self.bump();
                info!("Account '{}' reset.", username);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn status_of(&self, username: &str) -> Option<AccountStatus> {
        self.accounts.get(username).map(|slot| slot.status)
    }

    pub fn status_counts(&self) -> HashMap<AccountStatus, usize> {
        let mut counts = HashMap::new();
        for slot in self.accounts.iter() {
            *counts.entry(slot.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn ready_count(&self) -> usize {
        self.count_in(AccountStatus::Ready)
    }

    /// Accounts leased out or mid-login; each will be released eventually.
    pub fn busy_count(&self) -> usize {
        self.count_in(AccountStatus::Busy)
    }

    fn count_in(&self, status: AccountStatus) -> usize {
        self.accounts.iter().filter(|slot| slot.status == status).count()
    }

    /// Bumped on every state change; lets callers tell whether a saved
    /// snapshot is still current.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Expires elapsed cooldowns and logs in every `Unauthenticated` account.
    /// Accounts are held `Busy` while their login is in flight; each one is
    /// settled, and waiters woken, as soon as its own login finishes.
    pub async fn ensure_sessions(&self) -> SessionSweep {
        let now = Utc::now();
        let mut sweep = SessionSweep::default();
        let mut pending = Vec::new();

        for mut slot in self.accounts.iter_mut() {
            if slot.status == AccountStatus::Cooldown
                && slot.cooldown_until.is_none_or(|until| until <= now)
            {
                slot.status = AccountStatus::Unauthenticated;
                slot.cooldown_until = None;
                sweep.cooldowns_expired += 1;
            }
            if slot.status == AccountStatus::Unauthenticated {
                slot.status = AccountStatus::Busy;
                pending.push(slot.credentials.clone());
            }
        }

        if pending.is_empty() {
            if sweep.cooldowns_expired > 0 {
                self.bump();
            }
            return sweep;
        }
        self.bump();

        debug!("Logging in {} account(s)...", pending.len());
        let settled = join_all(pending.iter().map(|creds| async move {
            let settled = match self.login(creds).await {
                Ok(session) => {
                    self.finish_login(&creds.username, Some(session), None, false);
                    LoginSettled::Ready
                }
                Err(AuthError::Transient(reason)) => {
                    self.finish_login(&creds.username, None, Some(reason), false);
                    LoginSettled::Deferred
                }
                Err(e) => {
                    let reason = e.to_string();
                    self.finish_login(&creds.username, None, Some(reason.clone()), true);
                    LoginSettled::Failed(reason)
                }
            };
            self.released.notify_waiters();
            (creds.username.clone(), settled)
        }))
        .await;

        for (username, settled) in settled {
            match settled {
                LoginSettled::Ready => sweep.authenticated += 1,
                LoginSettled::Deferred => sweep.cooled_down += 1,
                LoginSettled::Failed(reason) => sweep.failed.push((username, reason)),
            }
        }
        sweep
    }

    async fn login(&self, credentials: &AccountCredentials) -> Result<Box<dyn SessionClient>, AuthError> {
        let mut session = self.factory.open(credentials);
        match tokio::time::timeout(self.config.auth_timeout, session.authenticate()).await {
            Ok(Ok(())) => Ok(session),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AuthError::Transient(format!(
                "login timed out after {:?}", self.config.auth_timeout
            ))),
        }
    }

    fn finish_login(
        &self,
        username: &str,
        session: Option<Box<dyn SessionClient>>,
        error: Option<String>,
        permanent: bool,
    ) {
        let Some(mut slot) = self.accounts.get_mut(username) else {
            debug!("Account '{}' was removed during login.", username);
            return;
        };
        match (session, error) {
            (Some(session), _) => {
                slot.status = AccountStatus::Ready;
                slot.session = Some(session);
                slot.last_error = None;
                debug!("Account '{}' is ready.", username);
            }
            (None, reason) if permanent => {
                warn!("Account '{}' failed to authenticate: {:?}", username, reason);
                slot.status = AccountStatus::Failed;
                slot.last_error = reason;
            }
            (None, reason) => {
                warn!("Account '{}' login deferred: {:?}", username, reason);
                slot.status = AccountStatus::Cooldown;
                slot.cooldown_until = Some(self.cooldown_deadline());
                slot.last_error = reason;
            }
        }
        drop(slot);
        self.bump();
    }

    fn cooldown_deadline(&self) -> DateTime<Utc> {
        let window = chrono::Duration::from_std(self.config.cooldown)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        Utc::now() + window
    }

    /// Hands out one `Ready` account and marks it `Busy`. The account with the
    /// fewest successful actions goes first; ties go to file order.
    pub fn try_acquire(self: &Arc<Self>) -> Result<AccountLease, Error> {
        let mut candidates: Vec<(u64, usize, String)> = self
            .accounts
            .iter()
            .filter(|slot| slot.status == AccountStatus::Ready)
            .map(|slot| (slot.last_offset, slot.order, slot.key().clone()))
            .collect();
        candidates.sort();

        for (_, _, username) in candidates {
            let Some(mut slot) = self.accounts.get_mut(&username) else {
                continue;
            };
            // Someone else may have taken it since the snapshot.
            if slot.status != AccountStatus::Ready {
                continue;
            }
            match slot.session.take() {
                Some(session) => {
                    slot.status = AccountStatus::Busy;
                    drop(slot);
                    self.bump();
                    trace_transition(&username, AccountStatus::Ready, AccountStatus::Busy);
                    return Ok(AccountLease {
                        pool: Arc::clone(self),
                        username,
                        session: Some(session),
                    });
                }
                None => {
                    warn!("Account '{}' was ready without a session; forcing re-login.", username);
                    slot.status = AccountStatus::Unauthenticated;
                    drop(slot);
                    self.bump();
                }
            }
        }
        Err(Error::AccountUnavailable)
    }

    /// Like `try_acquire`, but waits up to `wait` for an account to be released.
    pub async fn acquire_timeout(self: &Arc<Self>, wait: Duration) -> Result<AccountLease, Error> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_acquire() {
                Err(Error::AccountUnavailable) => {}
                other => return other,
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(Error::AccountUnavailable);
            }
        }
    }

    /// Hands up to `n` accounts out at once (`None` = every ready account).
    pub fn acquire_many(self: &Arc<Self>, n: Option<usize>) -> Vec<AccountLease> {
        let mut leases = Vec::new();
        while n.is_none_or(|n| leases.len() < n) {
            match self.try_acquire() {
                Ok(lease) => leases.push(lease),
                Err(_) => break,
            }
        }
        leases
    }

    fn finish(&self, username: &str, session: Option<Box<dyn SessionClient>>, outcome: ReleaseOutcome) {
        let Some(mut slot) = self.accounts.get_mut(username) else {
            debug!("Released account '{}' is no longer in the pool.", username);
            return;
        };
        let next = match (outcome, session) {
            (ReleaseOutcome::Success, Some(session)) => {
                slot.last_offset += 1;
                slot.last_error = None;
                slot.session = Some(session);
                AccountStatus::Ready
            }
            (ReleaseOutcome::NotAccountFault(reason), Some(session)) => {
                slot.last_error = Some(reason);
                slot.session = Some(session);
                AccountStatus::Ready
            }
            // No session to go back to; log in again on the next sweep.
            (ReleaseOutcome::Success, None) | (ReleaseOutcome::NotAccountFault(_), None) => {
                AccountStatus::Unauthenticated
            }
            (ReleaseOutcome::Transient(reason), _) => {
                slot.cooldown_until = Some(self.cooldown_deadline());
                slot.last_error = Some(reason);
                AccountStatus::Cooldown
            }
            (ReleaseOutcome::Permanent(reason), _) => {
                warn!("Account '{}' marked failed: {}", username, reason);
                slot.last_error = Some(reason);
                AccountStatus::Failed
            }
        };
        slot.status = next;
        drop(slot);
        self.bump();
        trace_transition(username, AccountStatus::Busy, next);
        self.released.notify_waiters();
    }

    /// Point-in-time copy of every account's persisted state, in file order.
    pub fn snapshot_index(&self) -> AccountIndex {
        let mut slots: Vec<(usize, AccountIndexEntry)> = self
            .accounts
            .iter()
            .map(|slot| (slot.order, slot.index_entry()))
            .collect();
        slots.sort_by_key(|(order, _)| *order);
        AccountIndex {
            entries: slots.into_iter().map(|(_, entry)| entry).collect(),
        }
    }

    /// Snapshots the index, then writes it without holding any account lock.
    pub async fn save_index(&self, path: &Path) -> Result<(), Error> {
        let index = self.snapshot_index();
        save_index(path, &index).await?;
        debug!("Saved account index ({} entries) to {}.", index.len(), path.display());
        Ok(())
    }
}

fn trace_transition(username: &str, from: AccountStatus, to: AccountStatus) {
    tracing::trace!("Account '{}': {} -> {}", username, from, to);
}

/// Exclusive use of one `Busy` account and its session.
///
/// Dropping a lease without calling `release` puts the account on cooldown,
/// so a panicking or aborted worker cannot leave it `Busy`.
pub struct AccountLease {
    pool: Arc<AccountPool>,
    username: String,
    session: Option<Box<dyn SessionClient>>,
}

impl AccountLease {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub async fn perform(&self, target: SteamId, action: &Action) -> Result<(), ActionFailure> {
        match &self.session {
            Some(session) => session.perform_action(target, action).await,
            None => Err(ActionFailure::AuthExpired("lease has no session".into())),
        }
    }

    pub fn release(mut self, outcome: ReleaseOutcome) {
        let session = self.session.take();
        self.pool.finish(&self.username, session, outcome);
    }
}

impl Drop for AccountLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
            self.pool.finish(
                &self.username,
                None,
                ReleaseOutcome::Transient("lease dropped without release".into()),
            );
        }
    }
}

impl std::fmt::Debug for AccountLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountLease").field("username", &self.username).finish()
    }
}
