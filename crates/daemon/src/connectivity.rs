// WG Auto-Tunnel - Connectivity Watcher
// Polls the kernel routing table and classifies the default-route
// interface into a transport snapshot for the orchestration core

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use wg_autotunnel_common::{ConnectivitySnapshot, Transport};

const PROC_NET_ROUTE: &str = "/proc/net/route";

/// Spawn the polling watcher. It publishes into the watch channel only
/// when the snapshot actually changes and exits when the receiver side is
/// gone.
pub fn spawn_watcher(
    tx: watch::Sender<ConnectivitySnapshot>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let snapshot = sample().await;
            let changed = tx.send_if_modified(|current| {
                if *current != snapshot {
                    *current = snapshot.clone();
                    true
                } else {
                    false
                }
            });
            if changed {
                debug!(?snapshot, "Connectivity changed");
            }
            if tx.is_closed() {
                break;
            }
            tokio::time::sleep(interval).await;
        }
    })
}

/// Take one connectivity sample from the live system
async fn sample() -> ConnectivitySnapshot {
    let route_table = match tokio::fs::read_to_string(PROC_NET_ROUTE).await {
        Ok(contents) => contents,
        Err(e) => {
            warn!(error = %e, "Failed to read routing table");
            return ConnectivitySnapshot::offline();
        }
    };

    let Some(interface) = default_route_interface(&route_table) else {
        return ConnectivitySnapshot::offline();
    };

    let wireless = Path::new("/sys/class/net")
        .join(&interface)
        .join("wireless")
        .exists();

    match classify_interface(&interface, wireless) {
        Transport::Wifi => ConnectivitySnapshot {
            transport: Transport::Wifi,
            wifi_network_id: current_ssid().await,
        },
        transport => ConnectivitySnapshot {
            transport,
            wifi_network_id: None,
        },
    }
}

/// Find the interface carrying the default route.
///
/// Tunnel interfaces are skipped so the VPN's own route never feeds back
/// into the decision that controls it.
fn default_route_interface(route_table: &str) -> Option<String> {
    route_table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let iface = fields.next()?;
            let destination = fields.next()?;
            (destination == "00000000").then(|| iface.to_string())
        })
        .find(|iface| !is_tunnel_interface(iface))
}

fn is_tunnel_interface(name: &str) -> bool {
    name.starts_with("wg") || name.starts_with("tun") || name.starts_with("tap")
}

fn classify_interface(name: &str, wireless: bool) -> Transport {
    if wireless {
        return Transport::Wifi;
    }
    if name.starts_with("wwan") || name.starts_with("ppp") || name.starts_with("usb") {
        return Transport::Mobile;
    }
    Transport::Ethernet
}

async fn current_ssid() -> Option<String> {
    let output = Command::new("iwgetid").arg("-r").output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    let ssid = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!ssid.is_empty()).then_some(ssid)
}
