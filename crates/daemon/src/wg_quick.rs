// WG Auto-Tunnel - wg-quick Backend
// Drives tunnels through the wg-quick script and derives the handshake
// stream from `wg show <iface> latest-handshakes`

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use wg_autotunnel_common::{HandshakeStatus, StartError, StopError, TunnelSpec};
use wg_autotunnel_core::TunnelBackend;

/// No handshake at all is tolerated this long after start before the
/// tunnel counts as never-connected.
const NEVER_CONNECTED_GRACE: Duration = Duration::from_secs(30);

/// A handshake older than this means the peer is gone. WireGuard
/// rekeys roughly every two minutes, so three minutes of silence is
/// conclusive.
const STALE_HANDSHAKE_THRESHOLD: Duration = Duration::from_secs(180);

pub struct WgQuickBackend {
    config_dir: PathBuf,
    poll_interval: Duration,
    active_interface: Mutex<Option<String>>,
}

impl WgQuickBackend {
    pub fn new(config_dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            config_dir: config_dir.into(),
            poll_interval,
            active_interface: Mutex::new(None),
        }
    }

    fn config_file(&self, interface: &str) -> PathBuf {
        self.config_dir.join(format!("{interface}.conf"))
    }

    fn set_active(&self, interface: Option<String>) {
        *self
            .active_interface
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = interface;
    }

    fn take_active(&self) -> Option<String> {
        self.active_interface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn current_active(&self) -> Option<String> {
        self.active_interface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn write_config(&self, interface: &str, contents: &str) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.config_dir).await?;
        let path = self.config_file(interface);
        tokio::fs::write(&path, contents).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        debug!(path = %path.display(), "WireGuard config written");
        Ok(path)
    }

    async fn remove_config(&self, interface: &str) {
        let path = self.config_file(interface);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove config file");
            }
        }
    }
}

async fn run_wg_quick(action: &str, conf_path: &std::path::Path) -> Result<(), String> {
    let conf = conf_path.to_string_lossy();
    info!("Running: wg-quick {} {}", action, conf);
    let output = Command::new("wg-quick")
        .args([action, conf.as_ref()])
        .output()
        .await
        .map_err(|e| format!("failed to run wg-quick: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("wg-quick {action} failed: {}", stderr.trim()));
    }
    Ok(())
}

#[async_trait]
impl TunnelBackend for WgQuickBackend {
    async fn start(&self, spec: &TunnelSpec) -> Result<(), StartError> {
        let blob = spec
            .quick_config
            .as_deref()
            .ok_or_else(|| StartError::MissingConfig("wg-quick".to_string()))?;

        let path = self.write_config(&spec.interface, blob).await?;

        if let Err(e) = run_wg_quick("up", &path).await {
            self.remove_config(&spec.interface).await;
            return Err(StartError::Backend(e));
        }

        self.set_active(Some(spec.interface.clone()));
        info!(interface = %spec.interface, name = spec.name(), "Tunnel interface up");
        Ok(())
    }

    async fn stop(&self) -> Result<(), StopError> {
        let Some(interface) = self.take_active() else {
            return Ok(());
        };

        let path = self.config_file(&interface);
        let result = run_wg_quick("down", &path).await;
        self.remove_config(&interface).await;

        match result {
            Ok(()) => {
                info!(%interface, "Tunnel interface down");
                Ok(())
            }
            Err(e) => Err(StopError::Backend(e)),
        }
    }

    fn observe_handshake(&self, _tunnel_id: Uuid) -> BoxStream<'static, HandshakeStatus> {
        let Some(interface) = self.current_active() else {
            return futures::stream::empty().boxed();
        };
        let poll_interval = self.poll_interval;
        let started = Instant::now();

        futures::stream::unfold(interface, move |interface| async move {
            tokio::time::sleep(poll_interval).await;

            let output = Command::new("wg")
                .args(["show", &interface, "latest-handshakes"])
                .output()
                .await;

            match output {
                Ok(out) if out.status.success() => {
                    let text = String::from_utf8_lossy(&out.stdout);
                    let status = status_for(
                        latest_handshake_epoch(&text),
                        unix_now_secs(),
                        started.elapsed(),
                    );
                    Some((status, interface))
                }
                // Interface gone or wg unavailable: end observation
                _ => {
                    debug!(%interface, "Handshake observation ended");
                    None
                }
            }
        })
        .boxed()
    }
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Parse `wg show <iface> latest-handshakes` output: one
/// `<pubkey>\t<epoch-seconds>` line per peer, 0 meaning never. Returns the
/// freshest epoch, or None when no peer has ever completed a handshake.
fn latest_handshake_epoch(output: &str) -> Option<u64> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|field| field.parse::<u64>().ok())
        .filter(|&epoch| epoch > 0)
        .max()
}

fn status_for(latest: Option<u64>, now_secs: u64, since_start: Duration) -> HandshakeStatus {
    match latest {
        None => {
            if since_start < NEVER_CONNECTED_GRACE {
                HandshakeStatus::NotStarted
            } else {
                HandshakeStatus::NeverConnected
            }
        }
        Some(epoch) => {
            let age = Duration::from_secs(now_secs.saturating_sub(epoch));
            if age > STALE_HANDSHAKE_THRESHOLD {
                HandshakeStatus::Unhealthy
            } else {
                HandshakeStatus::Healthy
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_latest_handshake_epochs() {
        let output = "pubA=\t0\npubB=\t1700000000\npubC=\t1700000100\n";
        assert_eq!(latest_handshake_epoch(output), Some(1700000100));
    }

    #[test]
    fn test_parse_no_handshake_yet() {
        assert_eq!(latest_handshake_epoch("pubA=\t0\n"), None);
        assert_eq!(latest_handshake_epoch(""), None);
        assert_eq!(latest_handshake_epoch("garbage line\n"), None);
    }

    #[test]
    fn test_status_within_grace_is_not_started() {
        let status = status_for(None, 1_700_000_000, Duration::from_secs(5));
        assert_eq!(status, HandshakeStatus::NotStarted);
    }

    #[test]
    fn test_status_after_grace_is_never_connected() {
        let status = status_for(None, 1_700_000_000, Duration::from_secs(31));
        assert_eq!(status, HandshakeStatus::NeverConnected);
    }

    #[test]
    fn test_status_fresh_handshake_is_healthy() {
        let now = 1_700_000_000;
        let status = status_for(Some(now - 30), now, Duration::from_secs(60));
        assert_eq!(status, HandshakeStatus::Healthy);
    }

    #[test]
    fn test_status_stale_handshake_is_unhealthy() {
        let now = 1_700_000_000;
        let status = status_for(Some(now - 181), now, Duration::from_secs(600));
        assert_eq!(status, HandshakeStatus::Unhealthy);
    }

    #[test]
    fn test_missing_quick_config_refused() {
        let dir = tempfile::tempdir().unwrap();
        let backend = WgQuickBackend::new(dir.path(), Duration::from_secs(5));
        let mut spec = TunnelSpec::new(
            "t".to_string(),
            "wg0".to_string(),
            "[Interface]\n".to_string(),
        );
        spec.quick_config = None;
        spec.amnezia_config = Some("[Interface]\n".to_string());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(backend.start(&spec));
        assert!(matches!(result, Err(StartError::MissingConfig(_))));
    }

    #[test]
    fn test_stop_without_active_tunnel_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let backend = WgQuickBackend::new(dir.path(), Duration::from_secs(5));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        assert!(runtime.block_on(backend.stop()).is_ok());
    }
}
