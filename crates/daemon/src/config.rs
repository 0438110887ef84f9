// WG Auto-Tunnel - Daemon Config Module
// Daemon-local configuration (paths, poll intervals, notifications).
// Settings and tunnel specs live in wg-autotunnel-common stores.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use wg_autotunnel_common::spec_store;

/// Get the runtime directory for daemon state
pub fn runtime_dir() -> Result<PathBuf> {
    let base = dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .ok_or_else(|| anyhow::anyhow!("Could not determine runtime directory"))?;
    Ok(base.join("wg-autotunnel"))
}

/// Get the socket path for the daemon
pub fn socket_path() -> Result<PathBuf> {
    Ok(runtime_dir()?.join("wg-autotunneld.sock"))
}

/// Daemon configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonConfig {
    /// Directory holding the TOML tunnel specs
    #[serde(default = "default_specs_dir")]
    pub specs_dir: PathBuf,

    /// Path of the persisted user settings document
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,

    /// Seconds between connectivity samples
    #[serde(default = "default_connectivity_poll_secs")]
    pub connectivity_poll_secs: u64,

    /// Seconds between handshake samples on the active tunnel
    #[serde(default = "default_handshake_poll_secs")]
    pub handshake_poll_secs: u64,

    /// Render tunnel events as desktop notifications
    #[serde(default = "default_notifications_enabled")]
    pub notifications_enabled: bool,
}

fn default_specs_dir() -> PathBuf {
    spec_store::default_specs_dir().unwrap_or_else(|_| PathBuf::from("tunnels"))
}

fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wg-autotunnel")
        .join("settings.toml")
}

fn default_connectivity_poll_secs() -> u64 {
    3
}

fn default_handshake_poll_secs() -> u64 {
    5
}

fn default_notifications_enabled() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            specs_dir: default_specs_dir(),
            settings_path: default_settings_path(),
            connectivity_poll_secs: default_connectivity_poll_secs(),
            handshake_poll_secs: default_handshake_poll_secs(),
            notifications_enabled: default_notifications_enabled(),
        }
    }
}

impl DaemonConfig {
    pub fn connectivity_poll_interval(&self) -> Duration {
        Duration::from_secs(self.connectivity_poll_secs.max(1))
    }

    pub fn handshake_poll_interval(&self) -> Duration {
        Duration::from_secs(self.handshake_poll_secs.max(1))
    }

    /// Load daemon configuration from file, writing defaults on first run
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("No daemon configuration found, using defaults");
            info!("Configuration will be saved to: {}", config_path.display());
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents =
            fs::read_to_string(&config_path).context("Failed to read daemon configuration")?;

        let config: Self =
            toml::from_str(&contents).context("Failed to parse daemon configuration")?;

        info!("Loaded daemon configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Save daemon configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create configuration directory")?;
        }

        let contents =
            toml::to_string_pretty(self).context("Failed to serialize daemon configuration")?;

        fs::write(&config_path, contents).context("Failed to write daemon configuration")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&config_path, permissions)
                .context("Failed to set config file permissions")?;
        }

        info!("Saved daemon configuration to: {}", config_path.display());
        Ok(())
    }

    /// Get the path to the daemon configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("wg-autotunnel").join("daemon.toml"))
    }
}
