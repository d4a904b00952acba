use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use titan_common::models::{BanStatus, SteamId};
use titan_common::traits::{BanLookup, WebCache};

use crate::Error;

/// Web cache key holding the Steam Web API key.
pub const STEAM_API_KEY: &str = "steam_api_key";

const DEFAULT_BASE_URL: &str = "https://api.steampowered.com";

/// Ban lookups through the public Steam Web API.
pub struct SteamWebApi {
    api_key: String,
    base_url: String,
    http_client: Client,
}

/// JSON shape for `ISteamUser/GetPlayerBans/v1`.
#[derive(Debug, Deserialize)]
struct PlayerBansResponse {
    #[serde(default)]
    players: Vec<PlayerBansJson>,
}

#[derive(Debug, Deserialize)]
struct PlayerBansJson {
    #[serde(rename = "SteamId")]
    steam_id: String,
    #[serde(rename = "CommunityBanned", default)]
    community_banned: bool,
    #[serde(rename = "VACBanned", default)]
    vac_banned: bool,
    #[serde(rename = "NumberOfVACBans", default)]
    number_of_vac_bans: u32,
    #[serde(rename = "DaysSinceLastBan", default)]
    days_since_last_ban: u32,
    #[serde(rename = "NumberOfGameBans", default)]
    number_of_game_bans: u32,
}

impl SteamWebApi {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, Error> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, timeout)
    }

    pub fn with_base_url(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let http_client = reqwest::ClientBuilder::new()
            .user_agent("Titan/1.0")
            .timeout(timeout)
            .build()
            .map_err(|e| Error::WebApi(format!("Failed to build reqwest client: {e}")))?;

        Ok(Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Builds a client from the key stored in the web cache, falling back to
    /// `env_key`. `None` when neither is set.
    pub fn from_cache(
        cache: &dyn WebCache,
        env_key: Option<String>,
        timeout: Duration,
    ) -> Result<Option<Self>, Error> {
        let cached = cache
            .get(STEAM_API_KEY)
            .and_then(|v| v.as_str().map(str::to_string));
        match cached.or(env_key).filter(|k| !k.trim().is_empty()) {
            Some(key) => Ok(Some(Self::new(key.trim(), timeout)?)),
            None => Ok(None),
        }
    }
}

fn into_status(player: PlayerBansJson) -> Option<BanStatus> {
    let target = match player.steam_id.parse::<SteamId>() {
        Ok(id) => id,
        Err(e) => {
            warn!("Ignoring ban entry with bad SteamId '{}': {}", player.steam_id, e);
            return None;
        }
    };
    Some(BanStatus {
        target,
        vac_banned: player.vac_banned,
        vac_bans: player.number_of_vac_bans,
        game_bans: player.number_of_game_bans,
        days_since_last_ban: player.days_since_last_ban,
        community_banned: player.community_banned,
    })
}

#[async_trait]
impl BanLookup for SteamWebApi {
    async fn lookup(&self, targets: &[SteamId]) -> Result<Vec<BanStatus>, Error> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let ids = targets
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/ISteamUser/GetPlayerBans/v1/", self.base_url);
        debug!("GetPlayerBans for {} target(s)", targets.len());

        let resp = self
            .http_client
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("steamids", ids.as_str())])
            .send()
            .await
            .map_err(|e| Error::WebApi(format!("GetPlayerBans: request failed => {e}")))?;

        if !resp.status().is_success() {
            let st = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(Error::WebApi(format!("GetPlayerBans => HTTP {st}, {txt}")));
        }

        let parsed: PlayerBansResponse = resp
            .json()
            .await
            .map_err(|e| Error::WebApi(format!("Parsing GetPlayerBans response => {e}")))?;
        Ok(parsed.players.into_iter().filter_map(into_status).collect())
    }
}
