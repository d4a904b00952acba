// File: src/session/dummy.rs

use std::time::Duration;
use async_trait::async_trait;
use tracing::info;
use titan_common::models::{AccountCredentials, Action, SteamId};

use crate::session::{ActionFailure, AuthError, SessionClient, SessionFactory};

/// Sessions that log in and "act" without touching the network.
#[derive(Debug, Clone)]
pub struct DummySessionFactory {
    delay: Duration,
}

impl DummySessionFactory {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for DummySessionFactory {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl SessionFactory for DummySessionFactory {
    fn open(&self, credentials: &AccountCredentials) -> Box<dyn SessionClient> {
        Box::new(DummySession {
            username: credentials.username.clone(),
            delay: self.delay,
            authenticated: false,
        })
    }
}

struct DummySession {
    username: String,
    delay: Duration,
    authenticated: bool,
}

#[async_trait]
impl SessionClient for DummySession {
    async fn authenticate(&mut self) -> Result<(), AuthError> {
        tokio::time::sleep(self.delay).await;
        self.authenticated = true;
        info!("[dummy] {} logged in.", self.username);
        Ok(())
    }

    async fn perform_action(&self, target: SteamId, action: &Action) -> Result<(), ActionFailure> {
        if !self.authenticated {
            return Err(ActionFailure::AuthExpired("dummy session never logged in".into()));
        }
        tokio::time::sleep(self.delay).await;
        info!("[dummy] {} would {} {} ({:?})", self.username, action.kind(), target, action);
        Ok(())
    }
}
