// File: titan-common/src/models/steam_id.rs

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// SteamID64 of the first individual account in the public universe.
const STEAMID64_BASE: u64 = 76561197960265728;

/// Universe 1, account type 1 (individual), instance 1.
const INDIVIDUAL_HIGH_BITS: u64 = STEAMID64_BASE >> 32;

/// Identity of a target (or account) on the platform, stored as a SteamID64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SteamId(u64);

impl SteamId {
    pub fn from_u64(value: u64) -> Result<Self, Error> {
        if value >> 32 != INDIVIDUAL_HIGH_BITS {
            return Err(Error::Parse(format!(
                "{} is not an individual SteamID64", value
            )));
        }
        Ok(SteamId(value))
    }

    /// Individual account in the public universe with the given account number.
    pub fn from_account_id(account_id: u32) -> Self {
        SteamId(STEAMID64_BASE + u64::from(account_id))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The 32-bit account number inside the SteamID64.
    pub fn account_id(&self) -> u32 {
        (self.0 - STEAMID64_BASE) as u32
    }

    /// Legacy `STEAM_0:Y:Z` rendering.
    pub fn steam2(&self) -> String {
        let account_id = self.account_id();
        format!("STEAM_0:{}:{}", account_id & 1, account_id >> 1)
    }

    /// `[U:1:W]` rendering.
    pub fn steam3(&self) -> String {
        format!("[U:1:{}]", self.account_id())
    }

    fn parse_steam2(s: &str) -> Result<Self, Error> {
        let rest = &s["STEAM_".len()..];
        let parts: Vec<&str> = rest.split(':').collect();
        if parts.len() != 3 {
            return Err(Error::Parse(format!("malformed STEAM_X:Y:Z id '{}'", s)));
        }
        let y: u64 = parts[1]
            .parse()
            .map_err(|_| Error::Parse(format!("bad auth bit in '{}'", s)))?;
        if y > 1 {
            return Err(Error::Parse(format!("bad auth bit in '{}'", s)));
        }
        let z: u64 = parts[2]
            .parse::<u32>()
            .map_err(|_| Error::Parse(format!("bad account number in '{}'", s)))?
            .into();
        SteamId::from_u64(STEAMID64_BASE + z * 2 + y)
    }

    fn parse_steam3(s: &str) -> Result<Self, Error> {
        let inner = &s[1..s.len() - 1];
        let account = inner
            .strip_prefix("U:1:")
            .ok_or_else(|| Error::Parse(format!("unsupported SteamID3 '{}'", s)))?;
        let w: u64 = account
            .parse::<u32>()
            .map_err(|_| Error::Parse(format!("bad account number in '{}'", s)))?
            .into();
        SteamId::from_u64(STEAMID64_BASE + w)
    }

    fn parse_profile_url(s: &str) -> Result<Self, Error> {
        let url = Url::parse(s)?;
        let mut segments = url
            .path_segments()
            .ok_or_else(|| Error::Parse(format!("no path in profile url '{}'", s)))?;
        match (segments.next(), segments.next()) {
            (Some("profiles"), Some(id)) => id.parse(),
            _ => Err(Error::Parse(format!(
                "only /profiles/<id64> urls are supported, got '{}'", s
            ))),
        }
    }
}

impl FromStr for SteamId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("http://") || s.starts_with("https://") {
            Self::parse_profile_url(s)
        } else if s.starts_with("STEAM_") {
            Self::parse_steam2(s)
        } else if s.starts_with('[') && s.ends_with(']') && s.len() > 2 {
            Self::parse_steam3(s)
        } else {
            let value: u64 = s
                .parse()
                .map_err(|_| Error::Parse(format!("unrecognised steam id '{}'", s)))?;
            SteamId::from_u64(value)
        }
    }
}

impl fmt::Display for SteamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SteamId {
    type Error = Error;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SteamId> for String {
    fn from(id: SteamId) -> Self {
        id.to_string()
    }
}
