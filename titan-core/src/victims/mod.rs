// File: titan-core/src/victims/mod.rs
//
// History of every target that has been acted on successfully.

use std::path::Path;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};
use titan_common::models::{BanStatus, SteamId, VictimRecord};

use crate::persistence::files::{parse_entries, read_json_value, write_json_atomic};
use crate::Error;

#[derive(Serialize)]
struct VictimsFile<'a> {
    victims: &'a [VictimRecord],
}

#[derive(Default)]
pub struct VictimStore {
    records: DashMap<SteamId, VictimRecord>,
}

impl VictimStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `victims.json`. A missing file is an empty store; malformed
    /// records are skipped.
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let store = Self::new();
        let Some(document) = read_json_value(path).await? else {
            info!("No victim history at {}; starting fresh.", path.display());
            return Ok(store);
        };
        let records: Vec<VictimRecord> = parse_entries(&document, "victims", path)?;
        for record in records {
            store.records.insert(record.target, record);
        }
        info!("Loaded {} victim record(s) from {}.", store.len(), path.display());
        Ok(store)
    }

    pub async fn save(&self, path: &Path) -> Result<(), Error> {
        let records = self.snapshot();
        write_json_atomic(path, &VictimsFile { victims: &records }).await?;
        debug!("Saved {} victim record(s) to {}.", records.len(), path.display());
        Ok(())
    }

    /// Counts one successful submission against `target`. Concurrent calls
    /// for the same target never lose an increment.
    pub fn record_visit(&self, target: SteamId, at: DateTime<Utc>) -> u64 {
        let record = self
            .records
            .entry(target)
            .and_modify(|r| {
                r.visits += 1;
                if at > r.last_acted {
                    r.last_acted = at;
                }
            })
            .or_insert_with(|| VictimRecord::first_visit(target, at));
        record.visits
    }

    pub fn get(&self, target: &SteamId) -> Option<VictimRecord> {
        self.records.get(target).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Targets not yet known to be banned.
    pub fn pending_checks(&self) -> Vec<SteamId> {
        let mut pending: Vec<SteamId> = self
            .records
            .iter()
            .filter(|r| !r.banned)
            .map(|r| *r.key())
            .collect();
        pending.sort();
        pending
    }

    /// Stores a lookup result. Returns true exactly once per target: the
    /// first time a ban is seen and not yet announced.
    pub fn apply_ban_status(&self, status: &BanStatus, at: DateTime<Utc>) -> bool {
        let Some(mut record) = self.records.get_mut(&status.target) else {
            return false;
        };
        record.last_checked = Some(at);
        if status.is_banned() {
            record.banned = true;
        }
        if record.banned && !record.ban_notified {
            record.ban_notified = true;
            return true;
        }
        false
    }

    pub fn mark_checked(&self, target: &SteamId, at: DateTime<Utc>) {
        if let Some(mut record) = self.records.get_mut(target) {
            record.last_checked = Some(at);
        }
    }

    /// Drops records last acted on before `cutoff`. Returns how many went.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.last_acted >= cutoff);
        before.saturating_sub(self.records.len())
    }

    /// Sorted copy of every record.
    pub fn snapshot(&self) -> Vec<VictimRecord> {
        let mut records: Vec<VictimRecord> = self.records.iter().map(|r| r.clone()).collect();
        records.sort_by_key(|r| r.target);
        records
    }
}
