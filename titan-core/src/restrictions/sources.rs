// File: titan-core/src/restrictions/sources.rs

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use titan_common::models::SteamId;
use titan_common::traits::RestrictionSource;

use crate::Error;

/// Parses a newline-separated list of identifiers. Blank lines and lines
/// starting with `#` are ignored. A single bad line fails the whole list:
/// a half-read blacklist is worse than none.
pub fn parse_restriction_list(text: &str, origin: &str) -> Result<HashSet<SteamId>, Error> {
    let mut set = HashSet::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let id: SteamId = line.parse().map_err(|e| {
            Error::RestrictionSource(format!("{} line {}: {}", origin, lineno + 1, e))
        })?;
        set.insert(id);
    }
    Ok(set)
}

pub struct StaticRestrictionSource {
    targets: HashSet<SteamId>,
}

impl StaticRestrictionSource {
    pub fn new(targets: impl IntoIterator<Item = SteamId>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
        }
    }
}

#[async_trait]
impl RestrictionSource for StaticRestrictionSource {
    fn describe(&self) -> String {
        format!("static list ({} entries)", self.targets.len())
    }

    async fn fetch(&self) -> Result<HashSet<SteamId>, Error> {
        Ok(self.targets.clone())
    }
}

pub struct FileRestrictionSource {
    path: PathBuf,
}

impl FileRestrictionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RestrictionSource for FileRestrictionSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<HashSet<SteamId>, Error> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        parse_restriction_list(&text, &self.describe())
    }
}

pub struct HttpRestrictionSource {
    url: url::Url,
    client: Client,
}

impl HttpRestrictionSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, Error> {
        let url = url::Url::parse(url)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl RestrictionSource for HttpRestrictionSource {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    async fn fetch(&self) -> Result<HashSet<SteamId>, Error> {
        debug!("Fetching restriction list from {}", self.url);
        let resp = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?;
        let text = resp.text().await?;
        parse_restriction_list(&text, &self.describe())
    }
}
