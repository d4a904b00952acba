//! In-memory stand-ins for every collaborator, shared by unit and
//! integration tests.

pub mod helpers;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::Notify;
use titan_common::models::{AccountCredentials, Action, BanStatus, SteamId};
use titan_common::traits::{
    BanLookup, Job, JobContext, JobId, JobOutcome, JobScheduler, RestrictionSource, Trigger, WebCache,
};

use crate::session::{ActionFailure, AuthError, SessionClient, SessionFactory};
use crate::Error;

pub use helpers::{credentials, steam_id, TestHarness};

/// What a scripted session does when asked to log in.
#[derive(Debug, Clone)]
pub enum AuthScript {
    Succeed,
    Fail(AuthError),
    /// Never completes.
    Hang,
    /// Succeeds after the given delay.
    Delay(Duration),
}

/// What a scripted session does when asked to act.
#[derive(Debug, Clone)]
pub enum ActionScript {
    Succeed,
    Fail(ActionFailure),
    /// Never completes.
    Hang,
    /// Succeeds once the notify fires.
    WaitFor(Arc<Notify>),
}

/// Shared call counters for every session a `RecordingSessionFactory` opens.
#[derive(Debug, Default)]
pub struct SessionCalls {
    pub opened: AtomicUsize,
    pub authenticate: AtomicUsize,
    pub perform: AtomicUsize,
    /// Times two actions ran on the same account at once. Must stay zero.
    pub overlaps: AtomicUsize,
    active: DashMap<String, usize>,
    pub targets: Mutex<Vec<SteamId>>,
}

impl SessionCalls {
    pub fn total(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
            + self.authenticate.load(Ordering::SeqCst)
            + self.perform.load(Ordering::SeqCst)
    }

    fn enter(&self, username: &str) {
        let mut active = self.active.entry(username.to_string()).or_insert(0);
        *active += 1;
        if *active > 1 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn leave(&self, username: &str) {
        if let Some(mut active) = self.active.get_mut(username) {
            *active = active.saturating_sub(1);
        }
    }
}

/// Opens sessions whose behaviour is scripted per account.
pub struct RecordingSessionFactory {
    auth: AuthScript,
    action: ActionScript,
    auth_overrides: Mutex<HashMap<String, AuthScript>>,
    action_overrides: Mutex<HashMap<String, ActionScript>>,
    pub calls: Arc<SessionCalls>,
}

impl Default for RecordingSessionFactory {
    fn default() -> Self {
        Self::new(AuthScript::Succeed, ActionScript::Succeed)
    }
}

impl RecordingSessionFactory {
    pub fn new(auth: AuthScript, action: ActionScript) -> Self {
        Self {
            auth,
            action,
            auth_overrides: Mutex::new(HashMap::new()),
            action_overrides: Mutex::new(HashMap::new()),
            calls: Arc::new(SessionCalls::default()),
        }
    }

    /// Scripts one account's login. Takes effect for sessions opened later.
    pub fn auth_for(&self, username: &str, script: AuthScript) {
        self.auth_overrides.lock().insert(username.to_string(), script);
    }

    pub fn action_for(&self, username: &str, script: ActionScript) {
        self.action_overrides.lock().insert(username.to_string(), script);
    }
}

impl SessionFactory for RecordingSessionFactory {
    fn open(&self, credentials: &AccountCredentials) -> Box<dyn SessionClient> {
        self.calls.opened.fetch_add(1, Ordering::SeqCst);
        let username = credentials.username.clone();
        let auth = self
            .auth_overrides
            .lock()
            .get(&username)
            .cloned()
            .unwrap_or_else(|| self.auth.clone());
        let action = self
            .action_overrides
            .lock()
            .get(&username)
            .cloned()
            .unwrap_or_else(|| self.action.clone());
        Box::new(ScriptedSession {
            username,
            auth,
            action,
            calls: self.calls.clone(),
        })
    }
}

struct ScriptedSession {
    username: String,
    auth: AuthScript,
    action: ActionScript,
    calls: Arc<SessionCalls>,
}

#[async_trait]
impl SessionClient for ScriptedSession {
    async fn authenticate(&mut self) -> Result<(), AuthError> {
        self.calls.authenticate.fetch_add(1, Ordering::SeqCst);
        match &self.auth {
            AuthScript::Succeed => Ok(()),
            AuthScript::Fail(e) => Err(e.clone()),
            AuthScript::Hang => std::future::pending().await,
            AuthScript::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
        }
    }

    async fn perform_action(&self, target: SteamId, _action: &Action) -> Result<(), ActionFailure> {
        self.calls.perform.fetch_add(1, Ordering::SeqCst);
        self.calls.targets.lock().push(target);
        self.calls.enter(&self.username);
        let _leave = LeaveGuard { calls: &self.calls, username: &self.username };

        // Give concurrent callers a chance to collide.
        tokio::task::yield_now().await;
        match &self.action {
            ActionScript::Succeed => Ok(()),
            ActionScript::Fail(e) => Err(e.clone()),
            ActionScript::Hang => std::future::pending().await,
            ActionScript::WaitFor(notify) => {
                notify.notified().await;
                Ok(())
            }
        }
    }
}

struct LeaveGuard<'a> {
    calls: &'a SessionCalls,
    username: &'a str,
}

impl Drop for LeaveGuard<'_> {
    fn drop(&mut self) {
        self.calls.leave(self.username);
    }
}

/// Scheduler that only runs jobs when told to.
#[derive(Default)]
pub struct ManualScheduler {
    jobs: Mutex<Vec<(JobId, Arc<dyn Job>)>>,
    executions: AtomicUsize,
    started: AtomicBool,
    shut_down: AtomicBool,
    pub shutdown_calls: AtomicUsize,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Runs one registered job right now.
    pub async fn fire(&self, id: JobId) -> Result<JobOutcome, Error> {
        if self.is_shutdown() {
            return Err(Error::Scheduler("scheduler is shut down".into()));
        }
        let job = self
            .jobs
            .lock()
            .iter()
            .find(|(job_id, _)| *job_id == id)
            .map(|(_, job)| job.clone())
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
        let execution = self.executions.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        Ok(job.run(JobContext { job_id: id, fired_at: Utc::now(), execution }).await)
    }

    /// Runs every registered job once, in registration order.
    pub async fn fire_all(&self) -> Result<Vec<JobOutcome>, Error> {
        let ids: Vec<JobId> = self.jobs.lock().iter().map(|(id, _)| *id).collect();
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            outcomes.push(self.fire(id).await?);
        }
        Ok(outcomes)
    }
}

#[async_trait]
impl JobScheduler for ManualScheduler {
    async fn register(&self, job: Arc<dyn Job>, _trigger: Trigger) -> Result<JobId, Error> {
        if self.is_shutdown() {
            return Err(Error::Scheduler("scheduler is shut down".into()));
        }
        let id = JobId::new();
        self.jobs.lock().push((id, job));
        Ok(id)
    }

    async fn start(&self) -> Result<(), Error> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self, _wait_for_jobs_to_complete: bool) -> Result<(), Error> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

/// Restriction list held in memory. `None` makes every fetch fail.
pub struct MemoryRestrictionSource {
    targets: RwLock<Option<HashSet<SteamId>>>,
    pub fetches: AtomicUsize,
}

impl MemoryRestrictionSource {
    pub fn with(targets: Vec<SteamId>) -> Self {
        Self {
            targets: RwLock::new(Some(targets.into_iter().collect())),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            targets: RwLock::new(None),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, targets: Option<Vec<SteamId>>) {
        *self.targets.write() = targets.map(|t| t.into_iter().collect());
    }
}

#[async_trait]
impl RestrictionSource for MemoryRestrictionSource {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn fetch(&self) -> Result<HashSet<SteamId>, Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.targets
            .read()
            .clone()
            .ok_or_else(|| Error::RestrictionSource("source unavailable".into()))
    }
}

/// Web cache kept in memory; counts saves.
#[derive(Default)]
pub struct MemoryWebCache {
    entries: RwLock<Map<String, Value>>,
    pub saves: AtomicUsize,
    pub fail_saves: AtomicBool,
    hold: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl MemoryWebCache {
    /// Makes the next save signal `entered` and then wait for `resume`.
    pub fn hold_next_save(&self, entered: Arc<Notify>, resume: Arc<Notify>) {
        *self.hold.lock() = Some((entered, resume));
    }
}

#[async_trait]
impl WebCache for MemoryWebCache {
    async fn load(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn save(&self) -> Result<(), Error> {
        let hold = self.hold.lock().take();
        if let Some((entered, resume)) = hold {
            entered.notify_one();
            resume.notified().await;
        }
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::persistence("save web cache", "disk full"));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.entries.write().insert(key.to_string(), value);
    }
}

/// Ban lookup answering from a fixed table; unknown targets come back clean.
pub struct FakeBanLookup {
    banned: HashMap<SteamId, BanStatus>,
    fail: bool,
    pub calls: AtomicUsize,
    batch_size: usize,
}

impl FakeBanLookup {
    pub fn new(banned: Vec<BanStatus>) -> Self {
        Self {
            banned: banned.into_iter().map(|b| (b.target, b)).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
            batch_size: 100,
        }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::new(Vec::new()) }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

#[async_trait]
impl BanLookup for FakeBanLookup {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn lookup(&self, targets: &[SteamId]) -> Result<Vec<BanStatus>, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::WebApi("lookup unavailable".into()));
        }
        Ok(targets
            .iter()
            .map(|t| {
                self.banned.get(t).cloned().unwrap_or(BanStatus {
                    target: *t,
                    vac_banned: false,
                    vac_bans: 0,
                    game_bans: 0,
                    days_since_last_ban: 0,
                    community_banned: false,
                })
            })
            .collect())
    }
}
