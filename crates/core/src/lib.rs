// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 WG Auto-Tunnel Contributors

// WG Auto-Tunnel - Orchestration Core
// Decision engine, tunnel lifecycle controller, and health supervisor

pub mod backend;
pub mod decision;
pub mod health;
pub mod lifecycle;
pub mod orchestrator;

pub use backend::TunnelBackend;
pub use decision::{decide, select_target, Action};
pub use health::{HealthEvent, HealthSupervisor};
pub use lifecycle::TunnelRuntimeState;
pub use orchestrator::{
    ControlRequest, Orchestrator, OrchestratorHandle, OrchestratorInputs, SettingsWriter,
    StatusSnapshot,
};
