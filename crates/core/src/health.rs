// WG Auto-Tunnel - Health Supervisor
// Collapses the raw handshake stream into at most one connected and one
// failure event per connection attempt

use wg_autotunnel_common::HandshakeStatus;

/// User-facing health transition derived from the handshake stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// First healthy handshake of this session
    Connected,
    /// Tunnel started but has never completed a handshake
    NeverConnected,
    /// A previously healthy handshake went stale
    LostConnection,
}

/// Per-generation notification suppression state.
///
/// The two latches make repeated identical statuses idempotent; they are
/// reset together exactly once per tunnel-start lifecycle so a restart can
/// produce a fresh pair of notifications. The restart latch keeps the
/// restart-on-failure policy to a single attempt per generation.
#[derive(Debug, Default)]
pub struct HealthSupervisor {
    connected_notified: bool,
    failure_notified: bool,
    restart_triggered: bool,
}

impl HealthSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all latches for a new generation
    pub fn reset(&mut self) {
        self.connected_notified = false;
        self.failure_notified = false;
        self.restart_triggered = false;
    }

    /// Apply one handshake status; returns the event to surface, if any.
    pub fn on_status(&mut self, status: HandshakeStatus) -> Option<HealthEvent> {
        match status {
            HandshakeStatus::NotStarted => None,
            HandshakeStatus::Healthy => {
                if self.connected_notified {
                    None
                } else {
                    self.connected_notified = true;
                    Some(HealthEvent::Connected)
                }
            }
            HandshakeStatus::NeverConnected => {
                if self.failure_notified {
                    None
                } else {
                    self.failure_notified = true;
                    Some(HealthEvent::NeverConnected)
                }
            }
            HandshakeStatus::Unhealthy => {
                if self.failure_notified {
                    None
                } else {
                    self.failure_notified = true;
                    Some(HealthEvent::LostConnection)
                }
            }
        }
    }

    /// Claim the single automatic restart allowed per generation.
    ///
    /// Returns true exactly once between resets.
    pub fn claim_restart(&mut self) -> bool {
        if self.restart_triggered {
            false
        } else {
            self.restart_triggered = true;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_started_is_silent() {
        let mut sup = HealthSupervisor::new();
        assert_eq!(sup.on_status(HandshakeStatus::NotStarted), None);
        assert_eq!(sup.on_status(HandshakeStatus::NotStarted), None);
    }

    #[test]
    fn test_repeated_healthy_notifies_once() {
        let mut sup = HealthSupervisor::new();
        assert_eq!(
            sup.on_status(HandshakeStatus::Healthy),
            Some(HealthEvent::Connected)
        );
        assert_eq!(sup.on_status(HandshakeStatus::Healthy), None);
    }

    #[test]
    fn test_repeated_unhealthy_notifies_once() {
        let mut sup = HealthSupervisor::new();
        assert_eq!(
            sup.on_status(HandshakeStatus::Unhealthy),
            Some(HealthEvent::LostConnection)
        );
        assert_eq!(sup.on_status(HandshakeStatus::Unhealthy), None);
    }

    #[test]
    fn test_never_connected_shares_failure_latch() {
        let mut sup = HealthSupervisor::new();
        assert_eq!(
            sup.on_status(HandshakeStatus::NeverConnected),
            Some(HealthEvent::NeverConnected)
        );
        // Same latch: a later Unhealthy within the generation stays quiet
        assert_eq!(sup.on_status(HandshakeStatus::Unhealthy), None);
    }

    #[test]
    fn test_connected_then_lost_both_fire() {
        let mut sup = HealthSupervisor::new();
        assert_eq!(
            sup.on_status(HandshakeStatus::Healthy),
            Some(HealthEvent::Connected)
        );
        assert_eq!(
            sup.on_status(HandshakeStatus::Unhealthy),
            Some(HealthEvent::LostConnection)
        );
    }

    #[test]
    fn test_reset_allows_fresh_pair() {
        let mut sup = HealthSupervisor::new();
        sup.on_status(HandshakeStatus::Healthy);
        sup.on_status(HandshakeStatus::Unhealthy);
        sup.reset();
        assert_eq!(
            sup.on_status(HandshakeStatus::Healthy),
            Some(HealthEvent::Connected)
        );
        assert_eq!(
            sup.on_status(HandshakeStatus::Unhealthy),
            Some(HealthEvent::LostConnection)
        );
    }

    #[test]
    fn test_restart_claimed_once_per_generation() {
        let mut sup = HealthSupervisor::new();
        assert!(sup.claim_restart());
        assert!(!sup.claim_restart());
        sup.reset();
        assert!(sup.claim_restart());
    }
}
