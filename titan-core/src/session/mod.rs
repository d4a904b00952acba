//! src/session/mod.rs
//!
//! The boundary to the platform's network protocol. The core only ever talks
//! to an account's connection through `SessionClient`.

pub mod dummy;

use async_trait::async_trait;
use thiserror::Error;
use titan_common::models::{AccountCredentials, Action, SteamId};

pub use dummy::DummySessionFactory;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("steam guard code required")]
    GuardRequired,

    /// Login could not complete for a reason that may go away (network, rate limit).
    #[error("transient login failure: {0}")]
    Transient(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionFailure {
    #[error("session authentication expired: {0}")]
    AuthExpired(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("target not found")]
    TargetNotFound,

    #[error("rejected by platform: {0}")]
    Rejected(String),
}

/// An authenticated handle for one account.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionClient: Send + Sync {
    async fn authenticate(&mut self) -> Result<(), AuthError>;
    async fn perform_action(&self, target: SteamId, action: &Action) -> Result<(), ActionFailure>;
}

/// Opens (unauthenticated) sessions for accounts.
#[cfg_attr(test, mockall::automock)]
pub trait SessionFactory: Send + Sync {
    fn open(&self, credentials: &AccountCredentials) -> Box<dyn SessionClient>;
}
