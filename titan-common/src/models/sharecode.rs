// File: titan-common/src/models/sharecode.rs

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::Error;

const DICTIONARY: &str = "ABCDEFGHJKLMNOPQRSTUVWXYZabcdefhijkmnopqrstuvwxyz23456789";
const PREFIX: &str = "CSGO-";
const PAYLOAD_LEN: usize = 25;

/// Match id the platform accepts when a report is not tied to a specific match.
pub const NO_MATCH_ID: u64 = 8;

/// A decoded match share code (`CSGO-xxxxx-xxxxx-xxxxx-xxxxx-xxxxx`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MatchShareCode {
    pub code: String,
    pub match_id: u64,
    pub outcome_id: u64,
    pub token: u16,
}

impl FromStr for MatchShareCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        let body = code
            .strip_prefix(PREFIX)
            .ok_or_else(|| Error::Parse(format!("share code '{}' must start with {}", code, PREFIX)))?;

        let groups: Vec<&str> = body.split('-').collect();
        if groups.len() != 5 || groups.iter().any(|g| g.len() != 5) {
            return Err(Error::Parse(format!("share code '{}' is not five groups of five", code)));
        }
        let payload: String = groups.concat();
        debug_assert_eq!(payload.len(), PAYLOAD_LEN);

        // Base-57, least significant character first, into an 18-byte big-endian integer.
        let mut bytes = [0u8; 18];
        for c in payload.chars().rev() {
            let digit = DICTIONARY
                .find(c)
                .ok_or_else(|| Error::Parse(format!("invalid character '{}' in share code", c)))?;
            let mut carry = digit as u32;
            for b in bytes.iter_mut().rev() {
                let v = (*b as u32) * 57 + carry;
                *b = (v & 0xff) as u8;
                carry = v >> 8;
            }
            if carry != 0 {
                return Err(Error::Parse(format!("share code '{}' is out of range", code)));
            }
        }

        let mut match_id = [0u8; 8];
        match_id.copy_from_slice(&bytes[0..8]);
        let mut outcome_id = [0u8; 8];
        outcome_id.copy_from_slice(&bytes[8..16]);

        Ok(MatchShareCode {
            code: code.to_string(),
            match_id: u64::from_le_bytes(match_id),
            outcome_id: u64::from_le_bytes(outcome_id),
            token: u16::from_le_bytes([bytes[16], bytes[17]]),
        })
    }
}

impl fmt::Display for MatchShareCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

impl TryFrom<String> for MatchShareCode {
    type Error = Error;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MatchShareCode> for String {
    fn from(code: MatchShareCode) -> Self {
        code.code
    }
}
