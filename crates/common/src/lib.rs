// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 WG Auto-Tunnel Contributors

// WG Auto-Tunnel - Common Library
// Shared data model, settings, and tunnel spec storage

pub mod error;
pub mod settings;
pub mod spec;
pub mod spec_store;
pub mod types;

pub use error::{Error, ObservationError, Result, StartError, StopError};
pub use settings::Settings;
pub use spec::{SpecMetadata, TunnelSpec};
pub use spec_store::{delete_spec, load_all_specs, load_spec, load_spec_by_id, save_spec};
pub use types::{ConnectivitySnapshot, HandshakeStatus, Transport, TunnelEvent, TunnelPhase};

// Re-export commonly used external types
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
