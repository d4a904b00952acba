// File: titan-common/src/models/victim.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::steam_id::SteamId;

/// History of one previously targeted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VictimRecord {
    pub target: SteamId,
    pub first_acted: DateTime<Utc>,
    pub last_acted: DateTime<Utc>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    /// Number of successful submissions against this target. Never decreases.
    pub visits: u64,
    #[serde(default)]
    pub banned: bool,
    #[serde(default)]
    pub ban_notified: bool,
}

impl VictimRecord {
    pub fn first_visit(target: SteamId, at: DateTime<Utc>) -> Self {
        Self {
            target,
            first_acted: at,
            last_acted: at,
            last_checked: None,
            visits: 1,
            banned: false,
            ban_notified: false,
        }
    }
}

/// Ban state reported by the platform's public web API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanStatus {
    pub target: SteamId,
    pub vac_banned: bool,
    pub vac_bans: u32,
    pub game_bans: u32,
    pub days_since_last_ban: u32,
    pub community_banned: bool,
}

impl BanStatus {
    pub fn is_banned(&self) -> bool {
        self.vac_banned || self.vac_bans > 0 || self.game_bans > 0
    }
}
