// File: titan-common/src/models/account.rs

use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_enabled() -> bool {
    true
}

/// One entry of the operator-managed accounts file.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountCredentials {
    pub username: String,
    pub password: String,

    /// Whether the account is protected by Steam Guard (sentry file).
    #[serde(default)]
    pub sentry: bool,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("sentry", &self.sentry)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Unauthenticated,
    Ready,
    Busy,
    Failed,
    Cooldown,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountStatus::Unauthenticated => write!(f, "unauthenticated"),
            AccountStatus::Ready => write!(f, "ready"),
            AccountStatus::Busy => write!(f, "busy"),
            AccountStatus::Failed => write!(f, "failed"),
            AccountStatus::Cooldown => write!(f, "cooldown"),
        }
    }
}

/// Persisted per-account state. `last_offset` counts successful actions and
/// drives which account is tried next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountIndexEntry {
    pub username: String,
    pub status: AccountStatus,
    #[serde(default)]
    pub last_offset: u64,
    #[serde(default)]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl AccountIndexEntry {
    pub fn fresh(username: &str) -> Self {
        Self {
            username: username.to_string(),
            status: AccountStatus::Unauthenticated,
            last_offset: 0,
            cooldown_until: None,
            last_error: None,
        }
    }
}

/// Ordered account index (file order is selection tie-break order).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountIndex {
    pub entries: Vec<AccountIndexEntry>,
}

impl AccountIndex {
    pub fn get(&self, username: &str) -> Option<&AccountIndexEntry> {
        self.entries.iter().find(|e| e.username == username)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
