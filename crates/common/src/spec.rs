// Tunnel spec structures for WG Auto-Tunnel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// One configured VPN endpoint definition, importable as a TOML file.
///
/// Created and edited externally (import/CLI); the orchestration core only
/// reads these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunnelSpec {
    #[serde(flatten)]
    pub metadata: SpecMetadata,

    /// WireGuard interface name the backend should use (e.g. "wg0")
    pub interface: String,

    /// Standard wg-quick configuration blob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_config: Option<String>,

    /// Amnezia-variant configuration blob, for backends that speak it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amnezia_config: Option<String>,

    /// Preferred tunnel when no default is configured
    #[serde(default)]
    pub is_primary: bool,

    /// Last-known desired-active flag, persisted for restore-at-boot
    #[serde(default)]
    pub is_active: bool,
}

/// Spec metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpecMetadata {
    /// Unique tunnel identifier
    pub id: Uuid,
    /// Human-readable tunnel name
    pub name: String,
    /// Spec creation timestamp
    pub created_at: DateTime<Utc>,
    /// Spec last modification timestamp
    pub modified_at: DateTime<Utc>,
}

impl TunnelSpec {
    /// Create a new spec carrying a standard wg-quick config blob
    pub fn new(name: String, interface: String, quick_config: String) -> Self {
        let now = Utc::now();
        Self {
            metadata: SpecMetadata {
                id: Uuid::new_v4(),
                name,
                created_at: now,
                modified_at: now,
            },
            interface,
            quick_config: Some(quick_config),
            amnezia_config: None,
            is_primary: false,
            is_active: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.metadata.id
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Validate the spec configuration
    pub fn validate(&self) -> Result<()> {
        if self.metadata.name.is_empty() {
            return Err(Error::Config("Tunnel name cannot be empty".to_string()));
        }
        if self.interface.is_empty() {
            return Err(Error::Config(
                "Interface name cannot be empty".to_string(),
            ));
        }
        if self
            .interface
            .contains(|c: char| !c.is_ascii_alphanumeric() && c != '-' && c != '_')
        {
            return Err(Error::Config(format!(
                "Invalid interface name: {}",
                self.interface
            )));
        }
        if self.quick_config.is_none() && self.amnezia_config.is_none() {
            return Err(Error::Config(
                "Tunnel spec carries no configuration blob".to_string(),
            ));
        }
        Ok(())
    }
}
