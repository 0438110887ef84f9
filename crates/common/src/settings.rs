// User settings for WG Auto-Tunnel
// Observed reactively by the orchestration core; persisted by the daemon

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Process-wide user configuration.
///
/// The core only reads these; mutation happens through the orchestrator's
/// control surface (pause/resume/enable) or the settings store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Master switch for automatic tunnel orchestration
    #[serde(default)]
    pub auto_tunnel_enabled: bool,

    /// Temporary user-initiated suppression; only meaningful while
    /// `auto_tunnel_enabled` is true
    #[serde(default)]
    pub auto_tunnel_paused: bool,

    /// Tunnel on Wi-Fi networks (unless trusted)
    #[serde(default)]
    pub tunnel_on_wifi: bool,

    /// Tunnel on mobile data
    #[serde(default)]
    pub tunnel_on_mobile_data: bool,

    /// Tunnel on Ethernet
    #[serde(default)]
    pub tunnel_on_ethernet: bool,

    /// Wi-Fi SSIDs on which tunneling is suppressed
    #[serde(default)]
    pub trusted_network_ssids: BTreeSet<String>,

    /// Restart the tunnel automatically when the handshake goes stale
    #[serde(default)]
    pub ping_restart_enabled: bool,

    /// Bring the last-active tunnel back up at daemon start
    #[serde(default)]
    pub restore_on_boot_enabled: bool,

    /// Suppress automation while the OS battery saver is active.
    /// Carried for configuration parity; the daemon has no battery signal.
    #[serde(default)]
    pub battery_saver_enabled: bool,

    /// Always-on VPN flag, carried for configuration parity
    #[serde(default)]
    pub always_on_vpn_enabled: bool,

    /// Preferred tunnel; wins the target selection when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tunnel_id: Option<Uuid>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_tunnel_enabled: false,
            auto_tunnel_paused: false,
            tunnel_on_wifi: false,
            tunnel_on_mobile_data: false,
            tunnel_on_ethernet: false,
            trusted_network_ssids: BTreeSet::new(),
            ping_restart_enabled: false,
            restore_on_boot_enabled: false,
            battery_saver_enabled: false,
            always_on_vpn_enabled: false,
            default_tunnel_id: None,
        }
    }
}

impl Settings {
    /// Enable or disable auto-tunnel.
    ///
    /// Disabling clears the paused flag: `auto_tunnel_paused` is only
    /// meaningful while the feature is enabled.
    pub fn set_auto_tunnel_enabled(&mut self, enabled: bool) {
        self.auto_tunnel_enabled = enabled;
        if !enabled {
            self.auto_tunnel_paused = false;
        }
    }

    /// Pause automation without disabling it. No-op while disabled.
    pub fn pause_auto_tunnel(&mut self) {
        if self.auto_tunnel_enabled {
            self.auto_tunnel_paused = true;
        }
    }

    /// Resume automation after a pause.
    pub fn resume_auto_tunnel(&mut self) {
        self.auto_tunnel_paused = false;
    }

    /// Check whether the given Wi-Fi network is trusted
    pub fn is_trusted_network(&self, ssid: &str) -> bool {
        self.trusted_network_ssids.contains(ssid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabling_clears_paused() {
        let mut settings = Settings {
            auto_tunnel_enabled: true,
            ..Default::default()
        };
        settings.pause_auto_tunnel();
        assert!(settings.auto_tunnel_paused);

        settings.set_auto_tunnel_enabled(false);
        assert!(!settings.auto_tunnel_enabled);
        assert!(!settings.auto_tunnel_paused);
    }

    #[test]
    fn test_pause_requires_enabled() {
        let mut settings = Settings::default();
        settings.pause_auto_tunnel();
        assert!(!settings.auto_tunnel_paused);
    }

    #[test]
    fn test_trusted_network_lookup() {
        let mut settings = Settings::default();
        settings.trusted_network_ssids.insert("HomeNet".to_string());
        assert!(settings.is_trusted_network("HomeNet"));
        assert!(!settings.is_trusted_network("CoffeeShop"));
    }

    #[test]
    fn test_toml_round_trip_defaults() {
        let settings = Settings::default();
        let toml_str = toml::to_string_pretty(&settings).expect("serialize");
        let parsed: Settings = toml::from_str(&toml_str).expect("parse");
        assert_eq!(settings, parsed);
    }
}
