//! src/eventbus/notifier.rs
//!
//! Spawns a task that subscribes to the EventBus and turns every event into
//! an operator-facing log line. Drains the queue on shutdown.

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::eventbus::{EventBus, TitanEvent};

/// Subscribes before returning, so no event published after this call is
/// missed. The returned handle completes once the bus is shut down and the
/// queue is empty.
pub async fn spawn_notification_logger(event_bus: &EventBus) -> JoinHandle<()> {
    let mut rx = event_bus.subscribe(None).await;
    let mut shutdown_rx = event_bus.shutdown_rx.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => notify(&event),
                        None => break,
                    }
                },
                Ok(_) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        while let Ok(event) = rx.try_recv() {
            notify(&event);
        }
        info!("Notification logger exited.");
    })
}

fn notify(event: &TitanEvent) {
    match event {
        TitanEvent::Blocked { target, .. } => {
            warn!(
                "Restriction applied: {} is blacklisted and cannot be targeted.",
                target
            );
        }
        TitanEvent::ActionFinished(summary) => {
            info!(
                "{} of {} finished: {} succeeded, {} failed, {} account(s) skipped.",
                summary.kind, summary.target, summary.succeeded, summary.failed, summary.skipped
            );
        }
        TitanEvent::AccountFailed { username, reason } => {
            warn!("Account '{}' is unusable until reset: {}", username, reason);
        }
        TitanEvent::VictimBanned { target, vac_bans, game_bans } => {
            info!(
                "Target {} has been banned ({} VAC, {} game ban(s)).",
                target, vac_bans, game_bans
            );
        }
        TitanEvent::ShutdownComplete { failures } => {
            if failures.is_empty() {
                info!("Shutdown complete.");
            } else {
                warn!("Shutdown complete with {} failed step(s).", failures.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn logger_drains_and_exits_on_shutdown() {
        let bus = EventBus::new();
        let handle = spawn_notification_logger(&bus).await;
        bus.publish(TitanEvent::AccountFailed { username: "a".into(), reason: "bad".into() }).await;
        bus.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("logger should exit")
            .unwrap();
    }
}
