// File: titan-core/src/accounts/index.rs
//
// Loading and saving of the accounts file (credentials) and the account
// index (per-account state that survives restarts).

use std::path::Path;
use tracing::{info, warn};
use titan_common::models::{AccountCredentials, AccountIndex, AccountIndexEntry};

use crate::persistence::files::{parse_entries, read_json_value, write_json_atomic};
use crate::Error;

/// Reads the operator's accounts file. The process cannot run without at
/// least one enabled account, so every failure here is `StartupFatal`.
pub async fn load_accounts_file(path: &Path) -> Result<Vec<AccountCredentials>, Error> {
    let document = match read_json_value(path).await {
        Ok(Some(doc)) => doc,
        Ok(None) => {
            return Err(Error::StartupFatal(format!(
                "accounts file {} does not exist", path.display()
            )));
        }
        Err(e) => {
            return Err(Error::StartupFatal(format!(
                "accounts file {} is unreadable: {}", path.display(), e
            )));
        }
    };

    let all: Vec<AccountCredentials> = parse_entries(&document, "accounts", path)
        .map_err(|e| Error::StartupFatal(e.to_string()))?;
    let total = all.len();

    let mut seen = std::collections::HashSet::new();
    let mut enabled = Vec::with_capacity(total);
    for creds in all {
        if !creds.enabled {
            continue;
        }
        if !seen.insert(creds.username.clone()) {
            warn!("Duplicate account '{}' in {}; keeping the first entry.", creds.username, path.display());
            continue;
        }
        enabled.push(creds);
    }

    if enabled.is_empty() {
        return Err(Error::StartupFatal(format!(
            "accounts file {} has no enabled accounts", path.display()
        )));
    }
    info!("Loaded {} enabled account(s) out of {} from {}.", enabled.len(), total, path.display());
    Ok(enabled)
}

/// Reads the persisted account index. A missing file is an empty index
/// (first run); a file that exists but cannot be read or parsed is fatal.
/// Individual malformed entries are skipped.
pub async fn load_index(path: &Path) -> Result<AccountIndex, Error> {
    let document = match read_json_value(path).await {
        Ok(Some(doc)) => doc,
        Ok(None) => {
            info!("No account index at {}; starting fresh.", path.display());
            return Ok(AccountIndex::default());
        }
        Err(e) => {
            return Err(Error::StartupFatal(format!(
                "account index {} is unreadable: {}", path.display(), e
            )));
        }
    };

    let entries: Vec<AccountIndexEntry> = parse_entries(&document, "entries", path)
        .map_err(|e| Error::StartupFatal(e.to_string()))?;
    info!("Loaded {} account index entries from {}.", entries.len(), path.display());
    Ok(AccountIndex { entries })
}

pub async fn save_index(path: &Path, index: &AccountIndex) -> Result<(), Error> {
    write_json_atomic(path, index).await
}
