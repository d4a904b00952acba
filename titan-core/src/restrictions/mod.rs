//! Decides whether a target may be acted on at all.
//!
//! The guard starts out `Unavailable` and stays that way until a source fetch
//! succeeds. While unavailable, every target counts as restricted.

pub mod sources;

use std::collections::HashSet;
use std::sync::Arc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use titan_common::models::SteamId;
use titan_common::traits::RestrictionSource;

use crate::Error;

pub use sources::{FileRestrictionSource, HttpRestrictionSource, StaticRestrictionSource};

#[derive(Debug, Clone)]
enum Snapshot {
    Unavailable,
    Loaded(Arc<HashSet<SteamId>>),
}

pub struct RestrictionGuard {
    source: Option<Arc<dyn RestrictionSource>>,
    snapshot: RwLock<Snapshot>,
}

impl RestrictionGuard {
    pub fn new(source: Arc<dyn RestrictionSource>) -> Self {
        Self {
            source: Some(source),
            snapshot: RwLock::new(Snapshot::Unavailable),
        }
    }

    /// A guard with nothing restricted. Used when the operator explicitly
    /// turns the blacklist off.
    pub fn disabled() -> Self {
        Self {
            source: None,
            snapshot: RwLock::new(Snapshot::Loaded(Arc::new(HashSet::new()))),
        }
    }

    /// Replaces the snapshot with a fresh fetch. On failure the previous good
    /// snapshot (if any) stays in effect.
    pub async fn refresh(&self) -> Result<usize, Error> {
        let Some(source) = &self.source else {
            return Ok(0);
        };
        match source.fetch().await {
            Ok(set) => {
                let count = set.len();
                *self.snapshot.write() = Snapshot::Loaded(Arc::new(set));
                info!("Loaded {} restricted target(s) from {}.", count, source.describe());
                Ok(count)
            }
            Err(e) => {
                if self.is_available() {
                    warn!("Refreshing restrictions from {} failed; keeping previous list: {}", source.describe(), e);
                } else {
                    warn!("Restrictions from {} unavailable; every target is blocked: {}", source.describe(), e);
                }
                Err(Error::RestrictionSource(e.to_string()))
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(*self.snapshot.read(), Snapshot::Loaded(_))
    }

    pub fn is_restricted(&self, target: &SteamId) -> bool {
        let restricted = match &*self.snapshot.read() {
            Snapshot::Unavailable => true,
            Snapshot::Loaded(set) => set.contains(target),
        };
        if restricted {
            debug!("Target {} is restricted.", target);
        }
        restricted
    }

    /// For callers holding an unparsed identifier. Anything that does not
    /// parse is treated as restricted.
    pub fn is_restricted_raw(&self, raw: &str) -> bool {
        match raw.parse::<SteamId>() {
            Ok(id) => self.is_restricted(&id),
            Err(_) => true,
        }
    }

    pub fn len(&self) -> usize {
        match &*self.snapshot.read() {
            Snapshot::Unavailable => 0,
            Snapshot::Loaded(set) => set.len(),
        }
    }
}
