// src/tasks/victim_tracking.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use titan_common::traits::{BanLookup, Job, JobContext, JobOutcome};

use crate::eventbus::{EventBus, TitanEvent};
use crate::victims::VictimStore;
use crate::Error;

pub const JOB_NAME: &str = "victim-tracker";

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub interval: Duration,
    /// Records not acted on for this long are dropped.
    pub retention: Duration,
    /// Where the store is saved after each run. `None` skips saving.
    pub store_path: Option<PathBuf>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            retention: Duration::from_secs(30 * 24 * 3600),
            store_path: None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackingReport {
    pub checked: usize,
    pub newly_banned: usize,
    pub pruned: usize,
}

/// Periodically re-checks every previously targeted entity, announces new
/// bans, and prunes stale history.
pub struct VictimTrackingJob {
    victims: Arc<VictimStore>,
    lookup: Option<Arc<dyn BanLookup>>,
    events: EventBus,
    config: TrackingConfig,
}

impl VictimTrackingJob {
    pub fn new(
        victims: Arc<VictimStore>,
        lookup: Option<Arc<dyn BanLookup>>,
        events: EventBus,
        config: TrackingConfig,
    ) -> Self {
        Self { victims, lookup, events, config }
    }

    pub async fn run_once(&self) -> Result<TrackingReport, Error> {
        let mut report = TrackingReport::default();
        let mut lookup_error = None;

        let pending = self.victims.pending_checks();
        match &self.lookup {
            Some(lookup) if !pending.is_empty() => {
                let batch = lookup.batch_size().max(1);
                for chunk in pending.chunks(batch) {
                    match lookup.lookup(chunk).await {
                        Ok(statuses) => {
                            let now = Utc::now();
                            for status in statuses {
                                report.checked += 1;
                                if self.victims.apply_ban_status(&status, now) {
                                    report.newly_banned += 1;
                                    self.events
                                        .publish(TitanEvent::VictimBanned {
                                            target: status.target,
                                            vac_bans: status.vac_bans,
                                            game_bans: status.game_bans,
                                        })
                                        .await;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("Ban lookup for {} target(s) failed: {}", chunk.len(), e);
                            lookup_error = Some(e);
                        }
                    }
                }
            }
            Some(_) => {}
            None => debug!("No ban lookup configured; skipping checks of {} target(s).", pending.len()),
        }

        let retention = chrono::Duration::from_std(self.config.retention)
            .map_err(|e| Error::Parse(format!("retention out of range: {}", e)))?;
        report.pruned = self.victims.prune_older_than(Utc::now() - retention);

        if let Some(path) = &self.config.store_path {
            self.victims
                .save(path)
                .await
                .map_err(|e| Error::persistence("save victims", e))?;
        }

        match lookup_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

#[async_trait]
impl Job for VictimTrackingJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn run(&self, ctx: JobContext) -> JobOutcome {
        match self.run_once().await {
            Ok(report) => {
                if report.newly_banned > 0 || report.pruned > 0 {
                    info!(
                        "Victim tracking run #{}: {} checked, {} newly banned, {} pruned.",
                        ctx.execution, report.checked, report.newly_banned, report.pruned
                    );
                }
                JobOutcome::Completed {
                    detail: format!(
                        "{} checked, {} newly banned, {} pruned",
                        report.checked, report.newly_banned, report.pruned
                    ),
                }
            }
            Err(e) => JobOutcome::Failed { reason: e.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use titan_common::models::BanStatus;
    use crate::test_utils::{steam_id, FakeBanLookup};

    fn banned(n: u32) -> BanStatus {
        BanStatus {
            target: steam_id(n),
            vac_banned: true,
            vac_bans: 1,
            game_bans: 0,
            days_since_last_ban: 0,
            community_banned: false,
        }
    }

    #[tokio::test]
    async fn new_bans_are_published_once() {
        let victims = Arc::new(VictimStore::new());
        victims.record_visit(steam_id(1), Utc::now());
        victims.record_visit(steam_id(2), Utc::now());
        let lookup: Arc<dyn BanLookup> = Arc::new(FakeBanLookup::new(vec![banned(1)]));
        let bus = EventBus::new();
        let mut rx = bus.subscribe(None).await;

        let job = VictimTrackingJob::new(victims.clone(), Some(lookup), bus, TrackingConfig::default());
        let first = job.run_once().await.unwrap();
        assert_eq!(first.newly_banned, 1);
        let second = job.run_once().await.unwrap();
        assert_eq!(second.newly_banned, 0);

        assert!(matches!(rx.try_recv(), Ok(TitanEvent::VictimBanned { .. })));
        assert!(rx.try_recv().is_err());
        assert_eq!(victims.get(&steam_id(2)).unwrap().visits, 1);
        assert!(victims.get(&steam_id(2)).unwrap().last_checked.is_some());
    }

    #[tokio::test]
    async fn lookup_failure_still_prunes_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("victims.json");
        let victims = Arc::new(VictimStore::new());
        victims.record_visit(steam_id(1), Utc::now() - chrono::Duration::days(90));
        victims.record_visit(steam_id(2), Utc::now());
        let lookup: Arc<dyn BanLookup> = Arc::new(FakeBanLookup::failing());

        let job = VictimTrackingJob::new(
            victims.clone(),
            Some(lookup),
            EventBus::new(),
            TrackingConfig { store_path: Some(path.clone()), ..TrackingConfig::default() },
        );
        let outcome = job
            .run(JobContext { job_id: Default::default(), fired_at: Utc::now(), execution: 1 })
            .await;
        assert!(outcome.is_failure());
        assert_eq!(victims.len(), 1);
        assert!(path.exists());
    }
}
