// ================================================================
// File: titan-common/src/error.rs
// ================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found error: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timeout error: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    /// No account was `Ready` when the request was dispatched.
    #[error("No account available")]
    AccountUnavailable,

    /// Every login a request attempted was refused and none was usable; those
    /// accounts are now `Failed` and stay out until reset.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// A request's logins all hit network trouble or timed out; the accounts
    /// are on cooldown and a later request may retry them.
    #[error("Transient action error: {0}")]
    TransientAction(String),

    #[error("Persistence error during {step}: {reason}")]
    Persistence { step: String, reason: String },

    /// The process cannot start (account sources unreadable or empty).
    #[error("Startup error: {0}")]
    StartupFatal(String),

    #[error("Shutdown in progress; request rejected")]
    ShuttingDown,

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Restriction source error: {0}")]
    RestrictionSource(String),

    #[error("Web API error: {0}")]
    WebApi(String),
}

impl Error {
    pub fn persistence(step: impl Into<String>, reason: impl ToString) -> Self {
        Error::Persistence {
            step: step.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<chrono::format::ParseError> for Error {
    fn from(err: chrono::format::ParseError) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Parse(format!("invalid url: {}", err))
    }
}
