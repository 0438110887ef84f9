// Common types for WG Auto-Tunnel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transport the device is currently using for its default route
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Wifi,
    Mobile,
    Ethernet,
    /// No usable network
    None,
}

/// Snapshot of the device's network context.
///
/// Produced by the connectivity watcher on every change and treated by the
/// core as a total replacement, never a delta.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectivitySnapshot {
    pub transport: Transport,
    /// SSID of the current Wi-Fi network, when `transport` is Wifi
    pub wifi_network_id: Option<String>,
}

impl ConnectivitySnapshot {
    /// Snapshot for a device with no usable network
    pub fn offline() -> Self {
        Self {
            transport: Transport::None,
            wifi_network_id: None,
        }
    }

    pub fn wifi(network_id: impl Into<String>) -> Self {
        Self {
            transport: Transport::Wifi,
            wifi_network_id: Some(network_id.into()),
        }
    }
}

impl Default for ConnectivitySnapshot {
    fn default() -> Self {
        Self::offline()
    }
}

/// Phase of the tunnel lifecycle state machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TunnelPhase {
    Idle,     // no tunnel and no transition in flight
    Starting, // backend start call in progress
    Up,       // backend reported the tunnel as established
    Stopping, // backend stop call in progress
}

impl TunnelPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, TunnelPhase::Idle)
    }

    /// Check if a transition is currently in flight
    pub fn is_in_progress(&self) -> bool {
        matches!(self, TunnelPhase::Starting | TunnelPhase::Stopping)
    }
}

/// Liveness of the active tunnel's peer handshake, as reported by the
/// backend. Lifetime is bound to one tunnel session; every new start
/// begins again at `NotStarted`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeStatus {
    NotStarted,
    /// Tunnel started but no handshake has ever completed
    NeverConnected,
    Healthy,
    /// A previously healthy handshake has gone stale
    Unhealthy,
}

/// Events emitted by the orchestrator for notification sinks and the API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TunnelEvent {
    /// A start transition was launched
    Starting { id: Uuid, timestamp: DateTime<Utc> },

    /// The backend brought the tunnel up
    Started { id: Uuid, timestamp: DateTime<Utc> },

    /// First healthy handshake of this session
    Connected { id: Uuid, timestamp: DateTime<Utc> },

    /// Tunnel started but never completed a handshake
    HandshakeTimeout { id: Uuid, timestamp: DateTime<Utc> },

    /// A previously healthy tunnel lost its connection
    ConnectionLost { id: Uuid, timestamp: DateTime<Utc> },

    /// Tunnel torn down
    Stopped {
        id: Option<Uuid>,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Backend refused or failed to establish the tunnel
    StartFailed {
        id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Backend failed to tear the tunnel down cleanly
    StopFailed {
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl TunnelEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TunnelEvent::Starting { timestamp, .. }
            | TunnelEvent::Started { timestamp, .. }
            | TunnelEvent::Connected { timestamp, .. }
            | TunnelEvent::HandshakeTimeout { timestamp, .. }
            | TunnelEvent::ConnectionLost { timestamp, .. }
            | TunnelEvent::Stopped { timestamp, .. }
            | TunnelEvent::StartFailed { timestamp, .. }
            | TunnelEvent::StopFailed { timestamp, .. } => *timestamp,
        }
    }
}
