pub mod account;
pub mod action;
pub mod sharecode;
pub mod steam_id;
pub mod victim;

pub use account::{AccountCredentials, AccountIndex, AccountIndexEntry, AccountStatus};
pub use action::{Action, ActionKind, ActionRequest, CommendInfo, IdleInfo, ReportInfo};
pub use sharecode::{MatchShareCode, NO_MATCH_ID};
pub use steam_id::SteamId;
pub use victim::{BanStatus, VictimRecord};
