//! src/eventbus/mod.rs
//!
//! In-process event bus. Everything the operator should be told about
//! (blocked targets, finished actions, failed accounts, bans) is published
//! here; presentation layers subscribe.

pub mod notifier;

use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::warn;
use uuid::Uuid;
use titan_common::models::SteamId;

use crate::orchestrator::ActionSummary;
use crate::persistence::StepFailure;

#[derive(Debug, Clone)]
pub enum TitanEvent {
    /// A request was refused because its target is restricted.
    Blocked {
        request_id: Uuid,
        target: SteamId,
    },

    ActionFinished(ActionSummary),

    /// An account was marked `Failed` and will not be used until reset.
    AccountFailed {
        username: String,
        reason: String,
    },

    /// A previously targeted entity has been banned.
    VictimBanned {
        target: SteamId,
        vac_bans: u32,
        game_bans: u32,
    },

    ShutdownComplete {
        failures: Vec<StepFailure>,
    },
}

impl TitanEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TitanEvent::Blocked { .. } => "action.blocked",
            TitanEvent::ActionFinished(_) => "action.finished",
            TitanEvent::AccountFailed { .. } => "account.failed",
            TitanEvent::VictimBanned { .. } => "victim.banned",
            TitanEvent::ShutdownComplete { .. } => "shutdown.complete",
        }
    }
}

/// Each subscriber gets its own bounded `mpsc` queue.
///
/// - Publishing never waits on a subscriber: if its buffer is full the event
///   is dropped for that subscriber with a warning.
/// - Subscribers that dropped their `Receiver` are pruned on publish.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<TitanEvent>>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    pub shutdown_rx: watch::Receiver<bool>,
}

const DEFAULT_BUFFER_SIZE: usize = 1024;

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            subscribers: Arc::new(Mutex::new(vec![])),
            shutdown_tx: Arc::new(tx),
            shutdown_rx: rx,
        }
    }

    /// Tells subscribers no further events will follow.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    pub async fn subscribe(&self, buffer_size: Option<usize>) -> mpsc::Receiver<TitanEvent> {
        let size = buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let (tx, rx) = mpsc::channel(size);
        self.subscribers.lock().await.push(tx);
        rx
    }

    pub async fn publish(&self, event: TitanEvent) {
        let mut subs = self.subscribers.lock().await;
        subs.retain(|s| match s.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Subscriber queue full; dropping {} event.", event.event_type());
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}
