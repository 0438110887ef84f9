// Error types for WG Auto-Tunnel

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tunnel spec not found: {0}")]
    SpecNotFound(String),

    #[error("Tunnel spec already exists: {0}")]
    SpecExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Orchestrator is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Backend refused or failed to establish a tunnel.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("Invalid tunnel spec: {0}")]
    InvalidSpec(String),

    #[error("No configuration blob for backend mode '{0}'")]
    MissingConfig(String),

    #[error("Backend failed to start tunnel: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Backend failed to tear a tunnel down cleanly.
#[derive(Error, Debug)]
pub enum StopError {
    #[error("Backend failed to stop tunnel: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A signal stream the core depends on terminated unexpectedly.
///
/// Fatal for the connectivity/settings/tunnel streams (the core cannot
/// decide without fresh input); non-fatal for the handshake stream.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationError {
    #[error("Connectivity stream closed unexpectedly")]
    ConnectivityClosed,

    #[error("Settings stream closed unexpectedly")]
    SettingsClosed,

    #[error("Tunnel set stream closed unexpectedly")]
    TunnelsClosed,
}
