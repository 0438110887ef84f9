// WG Auto-Tunnel - Desktop Notifications
// Renders health and failure events as desktop notifications

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use wg_autotunnel_common::{TunnelEvent, TunnelSpec};
use wg_autotunnel_core::{ControlRequest, OrchestratorHandle};

const RESTART_ACTION: &str = "restart";

/// A rendered notification. Health failures offer a restart button wired
/// to the orchestrator's manual restart path.
struct Notice {
    summary: String,
    body: String,
    restartable: bool,
}

/// Spawn the notification sink. Lagging behind the broadcast only drops
/// notifications, never events.
pub fn spawn(
    mut events: broadcast::Receiver<TunnelEvent>,
    tunnels: watch::Receiver<Vec<TunnelSpec>>,
    orchestrator: OrchestratorHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "Notification sink lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let Some(notice) = render(&event, &tunnels.borrow()) else {
                continue;
            };

            // notify-rust talks to DBus synchronously, and a restartable
            // notice stays open waiting for its button; neither may stall
            // the event loop.
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                match tokio::task::spawn_blocking(move || show(notice)).await {
                    Ok(Ok(true)) => {
                        debug!("Restart requested from notification");
                        if let Err(e) = orchestrator.send(ControlRequest::Restart).await {
                            warn!(error = %e, "Failed to submit restart");
                        }
                    }
                    Ok(Ok(false)) => {}
                    Ok(Err(e)) => debug!(error = %e, "Desktop notification failed"),
                    Err(e) => warn!(error = %e, "Notification task panicked"),
                }
            });
        }
    })
}

/// Display a notice; returns whether the user asked for a restart.
fn show(notice: Notice) -> notify_rust::error::Result<bool> {
    let mut notification = notify_rust::Notification::new();
    notification
        .summary(&notice.summary)
        .body(&notice.body)
        .appname("WG Auto-Tunnel");

    if !notice.restartable {
        notification.show()?;
        return Ok(false);
    }

    notification.action(RESTART_ACTION, "Restart");
    let handle = notification.show()?;
    let mut clicked = false;
    handle.wait_for_action(|action| clicked = action == RESTART_ACTION);
    Ok(clicked)
}

fn tunnel_name(id: Uuid, tunnels: &[TunnelSpec]) -> String {
    tunnels
        .iter()
        .find(|t| t.id() == id)
        .map(|t| t.name().to_string())
        .unwrap_or_else(|| id.to_string())
}

/// Map an event to a notification; routine transitions stay silent
fn render(event: &TunnelEvent, tunnels: &[TunnelSpec]) -> Option<Notice> {
    match event {
        TunnelEvent::Connected { id, .. } => Some(Notice {
            summary: "Tunnel connected".to_string(),
            body: format!("{} completed its handshake", tunnel_name(*id, tunnels)),
            restartable: false,
        }),
        TunnelEvent::HandshakeTimeout { id, .. } => Some(Notice {
            summary: "Tunnel failed to connect".to_string(),
            body: format!(
                "{} never completed a handshake. Check the peer configuration.",
                tunnel_name(*id, tunnels)
            ),
            restartable: true,
        }),
        TunnelEvent::ConnectionLost { id, .. } => Some(Notice {
            summary: "Tunnel connection lost".to_string(),
            body: format!("{} stopped responding", tunnel_name(*id, tunnels)),
            restartable: true,
        }),
        TunnelEvent::StartFailed { id, error, .. } => Some(Notice {
            summary: "Tunnel start failed".to_string(),
            body: format!("{}: {}", tunnel_name(*id, tunnels), error),
            restartable: false,
        }),
        TunnelEvent::StopFailed { error, .. } => Some(Notice {
            summary: "Tunnel stop failed".to_string(),
            body: error.clone(),
            restartable: false,
        }),
        TunnelEvent::Starting { .. }
        | TunnelEvent::Started { .. }
        | TunnelEvent::Stopped { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_spec(name: &str) -> TunnelSpec {
        TunnelSpec::new(
            name.to_string(),
            "wg0".to_string(),
            "[Interface]\n".to_string(),
        )
    }

    #[test]
    fn test_failure_messages_are_distinct() {
        let spec = sample_spec("office");
        let id = spec.id();
        let tunnels = vec![spec];
        let now = Utc::now();

        let timeout = render(
            &TunnelEvent::HandshakeTimeout { id, timestamp: now },
            &tunnels,
        )
        .unwrap();
        let lost = render(
            &TunnelEvent::ConnectionLost { id, timestamp: now },
            &tunnels,
        )
        .unwrap();

        assert_ne!(timeout.summary, lost.summary);
        assert!(timeout.body.contains("office"));
        assert!(lost.body.contains("office"));
    }

    #[test]
    fn test_health_failures_offer_restart() {
        let spec = sample_spec("office");
        let id = spec.id();
        let tunnels = vec![spec];
        let now = Utc::now();

        let timeout = render(
            &TunnelEvent::HandshakeTimeout { id, timestamp: now },
            &tunnels,
        )
        .unwrap();
        let lost = render(
            &TunnelEvent::ConnectionLost { id, timestamp: now },
            &tunnels,
        )
        .unwrap();
        let connected = render(&TunnelEvent::Connected { id, timestamp: now }, &tunnels).unwrap();

        assert!(timeout.restartable);
        assert!(lost.restartable);
        assert!(!connected.restartable);
    }

    #[test]
    fn test_routine_transitions_are_silent() {
        let spec = sample_spec("office");
        let id = spec.id();
        let tunnels = vec![spec];
        let now = Utc::now();

        assert!(render(&TunnelEvent::Starting { id, timestamp: now }, &tunnels).is_none());
        assert!(render(&TunnelEvent::Started { id, timestamp: now }, &tunnels).is_none());
    }

    #[test]
    fn test_unknown_tunnel_falls_back_to_id() {
        let id = Uuid::new_v4();
        let notice = render(
            &TunnelEvent::ConnectionLost {
                id,
                timestamp: Utc::now(),
            },
            &[],
        )
        .unwrap();
        assert!(notice.body.contains(&id.to_string()));
    }
}
