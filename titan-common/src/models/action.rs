// File: titan-common/src/models/action.rs

use std::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::sharecode::{MatchShareCode, NO_MATCH_ID};
use crate::models::steam_id::SteamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Report,
    Commend,
    Idle,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Report => write!(f, "report"),
            ActionKind::Commend => write!(f, "commend"),
            ActionKind::Idle => write!(f, "idle"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportInfo {
    pub abusive_text: bool,
    pub abusive_voice: bool,
    pub griefing: bool,
    pub aim_hacking: bool,
    pub wall_hacking: bool,
    pub other_hacking: bool,
    pub share_code: Option<MatchShareCode>,
}

impl ReportInfo {
    pub fn match_id(&self) -> u64 {
        self.share_code
            .as_ref()
            .map(|c| c.match_id)
            .unwrap_or(NO_MATCH_ID)
    }

    /// True if at least one abuse category is selected.
    pub fn has_category(&self) -> bool {
        self.abusive_text
            || self.abusive_voice
            || self.griefing
            || self.aim_hacking
            || self.wall_hacking
            || self.other_hacking
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommendInfo {
    pub friendly: bool,
    pub leader: bool,
    pub teacher: bool,
}

/// Idling has a shape but no behaviour yet; submitting it is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleInfo {
    pub app_ids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Action {
    Report(ReportInfo),
    Commend(CommendInfo),
    Idle(IdleInfo),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Report(_) => ActionKind::Report,
            Action::Commend(_) => ActionKind::Commend,
            Action::Idle(_) => ActionKind::Idle,
        }
    }
}

/// One operator-submitted unit of work. Consumed once by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub request_id: Uuid,
    pub target: SteamId,
    pub action: Action,
    /// Overrides the dispatch policy's fan-out for this request.
    #[serde(default)]
    pub max_accounts: Option<usize>,
}

impl ActionRequest {
    pub fn new(target: SteamId, action: Action) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            target,
            action,
            max_accounts: None,
        }
    }

    pub fn report(target: SteamId, info: ReportInfo) -> Self {
        Self::new(target, Action::Report(info))
    }

    pub fn commend(target: SteamId, info: CommendInfo) -> Self {
        Self::new(target, Action::Commend(info))
    }

    pub fn with_max_accounts(mut self, max: usize) -> Self {
        self.max_accounts = Some(max);
        self
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }
}
