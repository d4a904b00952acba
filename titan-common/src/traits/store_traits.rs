use std::collections::HashSet;
use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::models::{BanStatus, SteamId};

/// Opaque cache of web data, loaded at startup and saved at shutdown.
#[async_trait]
pub trait WebCache: Send + Sync {
    async fn load(&self) -> Result<(), Error>;
    async fn save(&self) -> Result<(), Error>;
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
}

/// Where the set of restricted targets comes from.
#[async_trait]
pub trait RestrictionSource: Send + Sync {
    fn describe(&self) -> String;
    async fn fetch(&self) -> Result<HashSet<SteamId>, Error>;
}

/// Looks up the current ban state of targets.
#[async_trait]
pub trait BanLookup: Send + Sync {
    /// Upper bound on `targets.len()` for one call.
    fn batch_size(&self) -> usize {
        100
    }

    async fn lookup(&self, targets: &[SteamId]) -> Result<Vec<BanStatus>, Error>;
}
