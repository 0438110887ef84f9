// WG Auto-Tunnel - Tunnel Backend Interface
// The single shared resource driven by the lifecycle controller

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use wg_autotunnel_common::{HandshakeStatus, StartError, StopError, TunnelSpec};

/// A tunnel data-plane implementation (wg-quick, kernel netlink, Amnezia,
/// userspace...).
///
/// The lifecycle controller is the backend's sole caller for `start` and
/// `stop`; the health supervisor only consumes the handshake stream. A
/// backend selects the configuration blob it understands from the spec and
/// fails with `StartError::MissingConfig` when the spec does not carry one.
#[async_trait]
pub trait TunnelBackend: Send + Sync + 'static {
    /// Establish the tunnel described by `spec`.
    async fn start(&self, spec: &TunnelSpec) -> Result<(), StartError>;

    /// Tear down the currently active tunnel.
    ///
    /// Must be safe to call when no tunnel is up.
    async fn stop(&self) -> Result<(), StopError>;

    /// Stream of handshake status updates for the active tunnel.
    ///
    /// The stream may repeat statuses; it ends when the backend stops
    /// observing the tunnel. Termination is not an error.
    fn observe_handshake(&self, tunnel_id: Uuid) -> BoxStream<'static, HandshakeStatus>;
}
