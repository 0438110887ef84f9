// WG Auto-Tunnel - Orchestrator
// Fan-in event loop: the single writer for runtime state and suppression
// latches. Input streams, transition completions, handshake samples, and
// control requests all converge here.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use wg_autotunnel_common::{
    ConnectivitySnapshot, Error, HandshakeStatus, ObservationError, Settings, TunnelEvent,
    TunnelPhase, TunnelSpec,
};

use crate::backend::TunnelBackend;
use crate::decision::{decide, select_target, Action};
use crate::health::{HealthEvent, HealthSupervisor};
use crate::lifecycle::{Completed, LifecycleController, Submitted, TransitionEvent};

const CONTROL_CHANNEL_CAPACITY: usize = 16;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Persists the settings document after the orchestrator mutates it
/// through the control surface.
pub trait SettingsWriter: Send + 'static {
    fn persist(&self, settings: &Settings) -> wg_autotunnel_common::Result<()>;
}

/// The three reactive inputs the core observes. Each is a total snapshot,
/// never a delta; the senders live in the daemon.
pub struct OrchestratorInputs {
    pub connectivity: watch::Receiver<ConnectivitySnapshot>,
    pub settings: watch::Receiver<Settings>,
    pub tunnels: watch::Receiver<Vec<TunnelSpec>>,
}

/// Imperative requests from the control API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Suspend automation without tearing down an established tunnel
    Pause,
    Resume,
    SetEnabled(bool),
    /// Manual toggle: start the selected tunnel when idle, stop otherwise
    Toggle,
    /// Stop and re-start the active tunnel under a new generation
    Restart,
    /// Tear down any tunnel and exit the event loop
    Shutdown,
}

/// Point-in-time view of the orchestrator, published over a watch channel
/// for the status API.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StatusSnapshot {
    pub phase: TunnelPhase,
    pub active_tunnel_id: Option<Uuid>,
    pub generation: u64,
    pub auto_tunnel_enabled: bool,
    pub auto_tunnel_paused: bool,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            phase: TunnelPhase::Idle,
            active_tunnel_id: None,
            generation: 0,
            auto_tunnel_enabled: false,
            auto_tunnel_paused: false,
        }
    }
}

/// Cheap, cloneable handle for talking to a running orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    control_tx: mpsc::Sender<ControlRequest>,
    events_tx: broadcast::Sender<TunnelEvent>,
    status_rx: watch::Receiver<StatusSnapshot>,
}

impl OrchestratorHandle {
    pub async fn send(&self, request: ControlRequest) -> wg_autotunnel_common::Result<()> {
        self.control_tx
            .send(request)
            .await
            .map_err(|_| Error::NotRunning)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TunnelEvent> {
        self.events_tx.subscribe()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status_rx.borrow().clone()
    }

    /// Watch endpoint for callers that want to await status changes
    pub fn watch_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }
}

/// One handshake status observation, tagged with the generation whose
/// watcher produced it. `status: None` marks end of stream.
#[derive(Debug)]
struct HandshakeSample {
    generation: u64,
    status: Option<HandshakeStatus>,
}

pub struct Orchestrator {
    backend: Arc<dyn TunnelBackend>,
    inputs: OrchestratorInputs,
    controller: LifecycleController,
    supervisor: HealthSupervisor,
    settings_writer: Box<dyn SettingsWriter>,

    // Local copies of the reactive inputs, refreshed on every change
    connectivity: ConnectivitySnapshot,
    settings: Settings,
    tunnels: Vec<TunnelSpec>,

    transitions_rx: mpsc::UnboundedReceiver<TransitionEvent>,
    handshake_tx: mpsc::UnboundedSender<HandshakeSample>,
    handshake_rx: mpsc::UnboundedReceiver<HandshakeSample>,
    control_rx: mpsc::Receiver<ControlRequest>,
    events_tx: broadcast::Sender<TunnelEvent>,
    status_tx: watch::Sender<StatusSnapshot>,

    shutting_down: bool,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn TunnelBackend>,
        inputs: OrchestratorInputs,
        settings_writer: Box<dyn SettingsWriter>,
    ) -> (Self, OrchestratorHandle) {
        let (transitions_tx, transitions_rx) = mpsc::unbounded_channel();
        let (handshake_tx, handshake_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());

        let controller = LifecycleController::new(Arc::clone(&backend), transitions_tx);

        let handle = OrchestratorHandle {
            control_tx,
            events_tx: events_tx.clone(),
            status_rx,
        };

        let orchestrator = Self {
            backend,
            inputs,
            controller,
            supervisor: HealthSupervisor::new(),
            settings_writer,
            connectivity: ConnectivitySnapshot::offline(),
            settings: Settings::default(),
            tunnels: Vec::new(),
            transitions_rx,
            handshake_tx,
            handshake_rx,
            control_rx,
            events_tx,
            status_tx,
            shutting_down: false,
        };

        (orchestrator, handle)
    }

    /// Run the event loop until shutdown, or until one of the reactive
    /// input streams closes underneath us.
    pub async fn run(mut self) -> Result<(), ObservationError> {
        self.connectivity = self.inputs.connectivity.borrow_and_update().clone();
        self.settings = self.inputs.settings.borrow_and_update().clone();
        self.tunnels = self.inputs.tunnels.borrow_and_update().clone();

        info!(
            tunnels = self.tunnels.len(),
            auto_tunnel = self.settings.auto_tunnel_enabled,
            "Orchestrator started"
        );

        self.restore_at_boot();
        self.evaluate();
        self.publish_status();

        loop {
            tokio::select! {
                changed = self.inputs.connectivity.changed() => {
                    changed.map_err(|_| ObservationError::ConnectivityClosed)?;
                    self.connectivity = self.inputs.connectivity.borrow_and_update().clone();
                    debug!(transport = ?self.connectivity.transport, "Connectivity changed");
                    self.evaluate();
                }
                changed = self.inputs.settings.changed() => {
                    changed.map_err(|_| ObservationError::SettingsClosed)?;
                    self.settings = self.inputs.settings.borrow_and_update().clone();
                    debug!("Settings changed");
                    self.evaluate();
                }
                changed = self.inputs.tunnels.changed() => {
                    changed.map_err(|_| ObservationError::TunnelsClosed)?;
                    self.tunnels = self.inputs.tunnels.borrow_and_update().clone();
                    debug!(tunnels = self.tunnels.len(), "Tunnel set changed");
                    self.evaluate();
                }
                Some(request) = self.control_rx.recv() => {
                    self.handle_control(request);
                }
                Some(event) = self.transitions_rx.recv() => {
                    self.on_transition(event);
                }
                Some(sample) = self.handshake_rx.recv() => {
                    self.on_handshake(sample);
                }
            }

            self.publish_status();
            if self.shutting_down && self.controller.runtime().phase.is_idle() {
                break;
            }
        }

        info!("Orchestrator stopped");
        Ok(())
    }

    /// Bring the last-active tunnel back up at daemon start when the user
    /// runs in manual mode. With automation on, the initial evaluation
    /// already decides.
    fn restore_at_boot(&mut self) {
        if !self.settings.restore_on_boot_enabled || self.settings.auto_tunnel_enabled {
            return;
        }
        if let Some(spec) = self.tunnels.iter().find(|t| t.is_active) {
            info!(id = %spec.id(), name = spec.name(), "Restoring tunnel from previous run");
            self.apply(Action::StartTunnel(spec.id()));
        }
    }

    /// Re-run the decision engine against the current snapshots
    fn evaluate(&mut self) {
        if self.shutting_down {
            return;
        }
        let action = decide(
            &self.connectivity,
            &self.settings,
            &self.tunnels,
            self.controller.runtime(),
        );
        self.apply(action);
    }

    fn apply(&mut self, action: Action) {
        match self.controller.submit(action, &self.tunnels) {
            Submitted::Ignored | Submitted::Stopping => {}
            Submitted::Starting { id } | Submitted::Switching { id } => {
                // Fresh generation: arm the notification latches again
                self.supervisor.reset();
                self.emit(TunnelEvent::Starting {
                    id,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    fn handle_control(&mut self, request: ControlRequest) {
        debug!(?request, "Control request");
        match request {
            ControlRequest::Pause => {
                self.settings.pause_auto_tunnel();
                self.persist_settings();
                self.evaluate();
            }
            ControlRequest::Resume => {
                self.settings.resume_auto_tunnel();
                self.persist_settings();
                self.evaluate();
            }
            ControlRequest::SetEnabled(enabled) => {
                self.settings.set_auto_tunnel_enabled(enabled);
                self.persist_settings();
                self.evaluate();
            }
            ControlRequest::Toggle => {
                if self.controller.runtime().phase.is_idle() {
                    let target = select_target(&self.settings, &self.tunnels).map(TunnelSpec::id);
                    match target {
                        Some(id) => self.apply(Action::StartTunnel(id)),
                        None => warn!("Toggle requested with no tunnels configured"),
                    }
                } else {
                    self.controller.submit(Action::StopTunnel, &self.tunnels);
                }
            }
            ControlRequest::Restart => match self.controller.runtime().active_tunnel_id {
                Some(id) => {
                    info!(%id, "Manual restart requested");
                    self.apply(Action::SwitchTunnel(id));
                }
                None => warn!("Restart requested with no active tunnel"),
            },
            ControlRequest::Shutdown => {
                info!("Shutdown requested");
                self.shutting_down = true;
                if !self.controller.runtime().phase.is_idle() {
                    self.controller.submit(Action::StopTunnel, &self.tunnels);
                }
            }
        }
    }

    fn on_transition(&mut self, event: TransitionEvent) {
        // The id the tunnel had before the controller rewrites state
        let prev_active = self.controller.runtime().active_tunnel_id;

        let Some(completed) = self.controller.handle(event) else {
            return;
        };

        match completed {
            Completed::Started { id } => {
                info!(%id, "Tunnel up");
                self.emit(TunnelEvent::Started {
                    id,
                    timestamp: Utc::now(),
                });
                self.spawn_handshake_watcher(id);
            }
            Completed::StartFailed { id, error } => {
                // No automatic retry; only the handshake restart policy
                // may bring a tunnel back after a failure.
                warn!(%id, error = %error, "Tunnel start failed");
                self.emit(TunnelEvent::StartFailed {
                    id,
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
            }
            Completed::Stopped => {
                info!("Tunnel down");
                self.supervisor.reset();
                let reason = if self.shutting_down {
                    "shutdown"
                } else {
                    "automation"
                };
                self.emit(TunnelEvent::Stopped {
                    id: prev_active,
                    reason: reason.to_string(),
                    timestamp: Utc::now(),
                });
            }
            Completed::StopFailed(error) => {
                warn!(error = %error, "Tunnel stop failed");
                self.supervisor.reset();
                self.emit(TunnelEvent::StopFailed {
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
            }
            Completed::SwitchStopped => {
                self.emit(TunnelEvent::Stopped {
                    id: prev_active,
                    reason: "switching".to_string(),
                    timestamp: Utc::now(),
                });
            }
            Completed::SwitchStopFailed(error) => {
                warn!(error = %error, "Stop half of switch failed, aborting switch");
                self.emit(TunnelEvent::StopFailed {
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    fn on_handshake(&mut self, sample: HandshakeSample) {
        if sample.generation != self.controller.runtime().generation {
            debug!(
                stale = sample.generation,
                "Discarding handshake sample from a superseded watcher"
            );
            return;
        }
        let Some(status) = sample.status else {
            // End of stream is not an error; the tunnel keeps running
            // without health supervision.
            debug!("Handshake stream ended");
            return;
        };
        let Some(event) = self.supervisor.on_status(status) else {
            return;
        };
        let Some(id) = self.controller.runtime().active_tunnel_id else {
            return;
        };

        match event {
            HealthEvent::Connected => {
                info!(%id, "Tunnel handshake healthy");
                self.emit(TunnelEvent::Connected {
                    id,
                    timestamp: Utc::now(),
                });
            }
            HealthEvent::NeverConnected => {
                // No restart here: a tunnel that never handshakes has a
                // configuration problem a retry cannot fix, and each retry
                // would open a fresh restart budget.
                warn!(%id, "Tunnel never completed a handshake");
                self.emit(TunnelEvent::HandshakeTimeout {
                    id,
                    timestamp: Utc::now(),
                });
            }
            HealthEvent::LostConnection => {
                warn!(%id, "Tunnel handshake went stale");
                self.emit(TunnelEvent::ConnectionLost {
                    id,
                    timestamp: Utc::now(),
                });
                self.maybe_restart(id);
            }
        }
    }

    /// One automatic restart per generation, and only when the user opted
    /// in. The restart itself opens a new generation with a fresh budget.
    fn maybe_restart(&mut self, id: Uuid) {
        if !self.settings.ping_restart_enabled {
            return;
        }
        if !self.supervisor.claim_restart() {
            return;
        }
        info!(%id, "Restarting tunnel after lost connection");
        self.apply(Action::SwitchTunnel(id));
    }

    /// Forward the backend's handshake stream into the loop, tagged with
    /// the current generation. The watcher dies with its generation's
    /// cancellation token, so a superseded watcher cannot leak samples.
    fn spawn_handshake_watcher(&self, id: Uuid) {
        let generation = self.controller.runtime().generation;
        let Some(token) = self.controller.current_token() else {
            return;
        };
        let mut stream = self.backend.observe_handshake(id);
        let tx = self.handshake_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = stream.next() => {
                        let sample = HandshakeSample {
                            generation,
                            status: next,
                        };
                        let closed = sample.status.is_none();
                        if tx.send(sample).is_err() || closed {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn persist_settings(&self) {
        if let Err(e) = self.settings_writer.persist(&self.settings) {
            warn!(error = %e, "Failed to persist settings");
        }
    }

    fn emit(&self, event: TunnelEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    fn publish_status(&self) {
        let runtime = self.controller.runtime();
        let snapshot = StatusSnapshot {
            phase: runtime.phase,
            active_tunnel_id: runtime.active_tunnel_id,
            generation: runtime.generation,
            auto_tunnel_enabled: self.settings.auto_tunnel_enabled,
            auto_tunnel_paused: self.settings.auto_tunnel_paused,
        };
        self.status_tx.send_if_modified(|current| {
            if *current != snapshot {
                *current = snapshot;
                true
            } else {
                false
            }
        });
    }
}
