// WG Auto-Tunnel - Decision Engine
// Pure mapping from (connectivity, settings, tunnel set, runtime) to action

use uuid::Uuid;

use wg_autotunnel_common::{ConnectivitySnapshot, Settings, Transport, TunnelPhase, TunnelSpec};

use crate::lifecycle::TunnelRuntimeState;

/// Desired tunnel action computed by the decision engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    NoOp,
    StartTunnel(Uuid),
    StopTunnel,
    /// Stop the current tunnel, then start a different one, under one
    /// generation token
    SwitchTunnel(Uuid),
}

/// Pick the tunnel automation should drive.
///
/// The tie-break is fixed and total so identical inputs always select the
/// same tunnel: configured default, then the spec marked primary, then the
/// last-active spec, then the first known spec.
pub fn select_target<'a>(settings: &Settings, tunnels: &'a [TunnelSpec]) -> Option<&'a TunnelSpec> {
    if let Some(default_id) = settings.default_tunnel_id {
        if let Some(spec) = tunnels.iter().find(|t| t.id() == default_id) {
            return Some(spec);
        }
    }
    tunnels
        .iter()
        .find(|t| t.is_primary)
        .or_else(|| tunnels.iter().find(|t| t.is_active))
        .or_else(|| tunnels.first())
}

fn should_tunnel(conn: &ConnectivitySnapshot, settings: &Settings) -> bool {
    match conn.transport {
        Transport::Wifi => {
            settings.tunnel_on_wifi
                && !conn
                    .wifi_network_id
                    .as_deref()
                    .is_some_and(|ssid| settings.is_trusted_network(ssid))
        }
        Transport::Mobile => settings.tunnel_on_mobile_data,
        Transport::Ethernet => settings.tunnel_on_ethernet,
        Transport::None => false,
    }
}

/// Compute the desired action for the current snapshot of all inputs.
///
/// Pure and side-effect free; the orchestrator re-evaluates it after every
/// connectivity, settings, or tunnel-set change.
pub fn decide(
    conn: &ConnectivitySnapshot,
    settings: &Settings,
    tunnels: &[TunnelSpec],
    runtime: &TunnelRuntimeState,
) -> Action {
    // Manual control retained by the user; never touch a manually
    // started tunnel.
    if !settings.auto_tunnel_enabled || settings.auto_tunnel_paused {
        return Action::NoOp;
    }

    let target = select_target(settings, tunnels);
    let wanted = target.is_some() && should_tunnel(conn, settings);

    if !wanted {
        return if runtime.phase != TunnelPhase::Idle {
            Action::StopTunnel
        } else {
            Action::NoOp
        };
    }

    let target = match target {
        Some(t) => t,
        None => return Action::NoOp,
    };

    match runtime.active_tunnel_id {
        Some(active) if active == target.id() => {
            if runtime.phase == TunnelPhase::Up {
                Action::NoOp
            } else {
                Action::StartTunnel(target.id())
            }
        }
        Some(_) => Action::SwitchTunnel(target.id()),
        None => Action::StartTunnel(target.id()),
    }
}
