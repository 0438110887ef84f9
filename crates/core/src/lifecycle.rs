// WG Auto-Tunnel - Lifecycle Controller
// Serializes all tunnel transitions against the backend; at most one
// logical start/stop is in flight, and a newer submission always wins

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use wg_autotunnel_common::{StartError, StopError, TunnelPhase, TunnelSpec};

use crate::backend::TunnelBackend;
use crate::decision::Action;

/// Delay between a stop completing and the follow-up start beginning in a
/// compound transition, so the backend can release OS-level VPN resources.
/// Deliberately a constant, not a user setting.
pub const STOP_START_DEBOUNCE: Duration = Duration::from_secs(1);

/// Runtime state of the tunnel lifecycle.
///
/// Owned exclusively by the lifecycle controller; `generation` identifies
/// the currently-authoritative transition and is compared at every
/// completion to discard stale results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelRuntimeState {
    pub phase: TunnelPhase,
    pub active_tunnel_id: Option<Uuid>,
    pub generation: u64,
}

impl Default for TunnelRuntimeState {
    fn default() -> Self {
        Self {
            phase: TunnelPhase::Idle,
            active_tunnel_id: None,
            generation: 0,
        }
    }
}

/// Completion report from a transition task, tagged with the generation it
/// was launched under.
#[derive(Debug)]
pub(crate) struct TransitionEvent {
    pub generation: u64,
    pub kind: TransitionKind,
}

#[derive(Debug)]
pub(crate) enum TransitionKind {
    /// Plain stop finished
    Stopped(Result<(), StopError>),
    /// The stop half of a switch finished; an Err aborts the switch
    SwitchStopped(Result<(), StopError>),
    /// A start finished
    Started {
        id: Uuid,
        result: Result<(), StartError>,
    },
}

/// What a freshly submitted action turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Submitted {
    /// Nothing launched; the generation was not bumped
    Ignored,
    Stopping,
    Starting { id: Uuid },
    Switching { id: Uuid },
}

/// Outcome of a non-stale transition completion, after the runtime state
/// has been updated.
#[derive(Debug)]
pub(crate) enum Completed {
    Stopped,
    StopFailed(StopError),
    /// Switch moved from Stopping to Starting
    SwitchStopped,
    SwitchStopFailed(StopError),
    Started { id: Uuid },
    StartFailed { id: Uuid, error: StartError },
}

pub(crate) struct LifecycleController {
    backend: Arc<dyn TunnelBackend>,
    runtime: TunnelRuntimeState,
    debounce: Duration,
    /// Token for the in-flight transition; cancelled when superseded
    cancel: Option<CancellationToken>,
    /// Tunnel the in-flight transition is driving toward (None for stop)
    target: Option<Uuid>,
    events_tx: mpsc::UnboundedSender<TransitionEvent>,
}

impl LifecycleController {
    pub fn new(
        backend: Arc<dyn TunnelBackend>,
        events_tx: mpsc::UnboundedSender<TransitionEvent>,
    ) -> Self {
        Self::with_debounce(backend, events_tx, STOP_START_DEBOUNCE)
    }

    pub fn with_debounce(
        backend: Arc<dyn TunnelBackend>,
        events_tx: mpsc::UnboundedSender<TransitionEvent>,
        debounce: Duration,
    ) -> Self {
        Self {
            backend,
            runtime: TunnelRuntimeState::default(),
            debounce,
            cancel: None,
            target: None,
            events_tx,
        }
    }

    pub fn runtime(&self) -> &TunnelRuntimeState {
        &self.runtime
    }

    /// Token of the current transition, for tasks (handshake watchers)
    /// whose lifetime is bound to it.
    pub fn current_token(&self) -> Option<CancellationToken> {
        self.cancel.clone()
    }

    /// Submit a desired action.
    ///
    /// Applies submissions in call order; a later submission supersedes an
    /// earlier one still in flight via the generation counter, never the
    /// reverse. `NoOp` and redundant re-submissions do not bump the
    /// generation.
    pub fn submit(&mut self, action: Action, tunnels: &[TunnelSpec]) -> Submitted {
        match action {
            Action::NoOp => Submitted::Ignored,
            Action::StopTunnel => {
                if self.runtime.phase == TunnelPhase::Stopping && self.target.is_none() {
                    debug!("Stop already in flight, ignoring");
                    return Submitted::Ignored;
                }
                self.begin(None);
                self.runtime.phase = TunnelPhase::Stopping;
                self.spawn_stop();
                Submitted::Stopping
            }
            Action::StartTunnel(id) => {
                if self.runtime.phase.is_in_progress() && self.target == Some(id) {
                    debug!(%id, "Start already in flight for this tunnel, ignoring");
                    return Submitted::Ignored;
                }
                self.begin(Some(id));
                self.runtime.phase = TunnelPhase::Starting;
                self.runtime.active_tunnel_id = Some(id);
                self.spawn_start(id, tunnels);
                Submitted::Starting { id }
            }
            Action::SwitchTunnel(id) => {
                if self.runtime.phase.is_in_progress() && self.target == Some(id) {
                    debug!(%id, "Switch already in flight for this tunnel, ignoring");
                    return Submitted::Ignored;
                }
                self.begin(Some(id));
                self.runtime.phase = TunnelPhase::Stopping;
                self.spawn_switch(id, tunnels);
                Submitted::Switching { id }
            }
        }
    }

    /// Apply a transition completion; stale generations are discarded so a
    /// slow completion can never clobber a newer state.
    pub fn handle(&mut self, event: TransitionEvent) -> Option<Completed> {
        if event.generation != self.runtime.generation {
            debug!(
                stale = event.generation,
                current = self.runtime.generation,
                "Discarding stale transition completion"
            );
            return None;
        }

        match event.kind {
            TransitionKind::Stopped(Ok(())) => {
                self.finish_idle();
                Some(Completed::Stopped)
            }
            TransitionKind::Stopped(Err(e)) => {
                // The backend could not tear down cleanly; the tunnel is
                // in an unknown state but the controller's authority says
                // it is no longer ours.
                self.finish_idle();
                Some(Completed::StopFailed(e))
            }
            TransitionKind::SwitchStopped(Ok(())) => {
                self.runtime.phase = TunnelPhase::Starting;
                self.runtime.active_tunnel_id = self.target;
                Some(Completed::SwitchStopped)
            }
            TransitionKind::SwitchStopped(Err(e)) => {
                self.finish_idle();
                Some(Completed::SwitchStopFailed(e))
            }
            TransitionKind::Started { id, result: Ok(()) } => {
                self.runtime.phase = TunnelPhase::Up;
                self.runtime.active_tunnel_id = Some(id);
                Some(Completed::Started { id })
            }
            TransitionKind::Started {
                id,
                result: Err(error),
            } => {
                self.finish_idle();
                Some(Completed::StartFailed { id, error })
            }
        }
    }

    /// Bump the generation, cancel any in-flight transition, and install a
    /// fresh cancellation token.
    fn begin(&mut self, target: Option<Uuid>) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.runtime.generation += 1;
        self.cancel = Some(CancellationToken::new());
        self.target = target;
    }

    fn finish_idle(&mut self) {
        self.runtime.phase = TunnelPhase::Idle;
        self.runtime.active_tunnel_id = None;
        self.target = None;
    }

    fn spawn_stop(&self) {
        let backend = Arc::clone(&self.backend);
        let tx = self.events_tx.clone();
        let generation = self.runtime.generation;

        tokio::spawn(async move {
            let result = backend.stop().await;
            let _ = tx.send(TransitionEvent {
                generation,
                kind: TransitionKind::Stopped(result),
            });
        });
    }

    fn spawn_start(&self, id: Uuid, tunnels: &[TunnelSpec]) {
        let generation = self.runtime.generation;
        let tx = self.events_tx.clone();

        let spec = match tunnels.iter().find(|t| t.id() == id) {
            Some(spec) => spec.clone(),
            None => {
                // The tunnel disappeared between decision and submission
                let _ = tx.send(TransitionEvent {
                    generation,
                    kind: TransitionKind::Started {
                        id,
                        result: Err(StartError::InvalidSpec(format!("unknown tunnel {id}"))),
                    },
                });
                return;
            }
        };

        let backend = Arc::clone(&self.backend);
        let token = self.cancel.clone().unwrap_or_default();

        tokio::spawn(async move {
            // The backend call itself may be uncancellable; a superseding
            // submission discards this result through the generation check.
            if token.is_cancelled() {
                return;
            }
            let result = backend.start(&spec).await;
            let _ = tx.send(TransitionEvent {
                generation,
                kind: TransitionKind::Started { id, result },
            });
        });
    }

    fn spawn_switch(&self, id: Uuid, tunnels: &[TunnelSpec]) {
        let generation = self.runtime.generation;
        let tx = self.events_tx.clone();
        let backend = Arc::clone(&self.backend);
        let token = self.cancel.clone().unwrap_or_default();
        let debounce = self.debounce;

        let spec = tunnels.iter().find(|t| t.id() == id).cloned();

        tokio::spawn(async move {
            let stop_result = backend.stop().await;
            let stop_failed = stop_result.is_err();
            let _ = tx.send(TransitionEvent {
                generation,
                kind: TransitionKind::SwitchStopped(stop_result),
            });
            if stop_failed {
                return;
            }

            let spec = match spec {
                Some(spec) => spec,
                None => {
                    let _ = tx.send(TransitionEvent {
                        generation,
                        kind: TransitionKind::Started {
                            id,
                            result: Err(StartError::InvalidSpec(format!("unknown tunnel {id}"))),
                        },
                    });
                    return;
                }
            };

            // Give the backend time to release OS-level VPN resources
            // before bringing the next tunnel up.
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(debounce) => {}
            }
            if token.is_cancelled() {
                return;
            }
            let result = backend.start(&spec).await;
            let _ = tx.send(TransitionEvent {
                generation,
                kind: TransitionKind::Started { id, result },
            });
        });
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("runtime", &self.runtime)
            .field("target", &self.target)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wg_autotunnel_common::HandshakeStatus;

    struct NullBackend {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl NullBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TunnelBackend for NullBackend {
        async fn start(&self, _spec: &TunnelSpec) -> Result<(), StartError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<(), StopError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn observe_handshake(&self, _tunnel_id: Uuid) -> BoxStream<'static, HandshakeStatus> {
            futures::stream::empty().boxed()
        }
    }

    fn sample_spec() -> TunnelSpec {
        TunnelSpec::new(
            "t".to_string(),
            "wg0".to_string(),
            "[Interface]\n".to_string(),
        )
    }

    #[tokio::test]
    async fn test_noop_never_bumps_generation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut ctl = LifecycleController::new(NullBackend::new(), tx);

        assert_eq!(ctl.submit(Action::NoOp, &[]), Submitted::Ignored);
        assert_eq!(ctl.runtime().generation, 0);
        assert_eq!(ctl.runtime().phase, TunnelPhase::Idle);
    }

    #[tokio::test]
    async fn test_start_then_completion() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backend = NullBackend::new();
        let mut ctl = LifecycleController::new(backend.clone(), tx);
        let spec = sample_spec();
        let id = spec.id();

        ctl.submit(Action::StartTunnel(id), &[spec]);
        assert_eq!(ctl.runtime().generation, 1);
        assert_eq!(ctl.runtime().phase, TunnelPhase::Starting);

        let event = rx.recv().await.expect("completion");
        let completed = ctl.handle(event).expect("not stale");
        assert!(matches!(completed, Completed::Started { id: got } if got == id));
        assert_eq!(ctl.runtime().phase, TunnelPhase::Up);
        assert_eq!(ctl.runtime().active_tunnel_id, Some(id));
        assert_eq!(backend.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_completion_discarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctl = LifecycleController::new(NullBackend::new(), tx);
        let spec_a = sample_spec();
        let spec_b = sample_spec();
        let (a, b) = (spec_a.id(), spec_b.id());
        let tunnels = vec![spec_a, spec_b];

        ctl.submit(Action::StartTunnel(a), &tunnels);
        ctl.submit(Action::StartTunnel(b), &tunnels);
        assert_eq!(ctl.runtime().generation, 2);

        // The superseded task sees its cancelled token and goes quiet, so
        // the next completion belongs to generation 2 driving tunnel B.
        let event = rx.recv().await.expect("completion");
        assert_eq!(event.generation, 2);
        let done = ctl.handle(event).expect("not stale");
        assert!(matches!(done, Completed::Started { id } if id == b));
        assert_eq!(ctl.runtime().active_tunnel_id, Some(b));

        // A completion carrying an old generation is discarded outright
        let stale = TransitionEvent {
            generation: 1,
            kind: TransitionKind::Started {
                id: a,
                result: Ok(()),
            },
        };
        assert!(ctl.handle(stale).is_none());
        assert_eq!(ctl.runtime().active_tunnel_id, Some(b));
    }

    #[tokio::test]
    async fn test_redundant_stop_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut ctl = LifecycleController::new(NullBackend::new(), tx);

        ctl.submit(Action::StopTunnel, &[]);
        let generation = ctl.runtime().generation;
        assert_eq!(ctl.submit(Action::StopTunnel, &[]), Submitted::Ignored);
        assert_eq!(ctl.runtime().generation, generation);
    }

    #[tokio::test]
    async fn test_start_unknown_tunnel_reports_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctl = LifecycleController::new(NullBackend::new(), tx);
        let id = Uuid::new_v4();

        ctl.submit(Action::StartTunnel(id), &[]);
        let event = rx.recv().await.expect("completion");
        let completed = ctl.handle(event).expect("not stale");
        assert!(matches!(
            completed,
            Completed::StartFailed {
                error: StartError::InvalidSpec(_),
                ..
            }
        ));
        assert_eq!(ctl.runtime().phase, TunnelPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_runs_stop_then_debounce_then_start() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backend = NullBackend::new();
        let mut ctl =
            LifecycleController::with_debounce(backend.clone(), tx, Duration::from_secs(1));
        let spec = sample_spec();
        let id = spec.id();

        ctl.submit(Action::SwitchTunnel(id), &[spec]);
        assert_eq!(ctl.runtime().phase, TunnelPhase::Stopping);

        let stopped = rx.recv().await.expect("stop half");
        assert!(matches!(stopped.kind, TransitionKind::SwitchStopped(Ok(()))));
        ctl.handle(stopped);
        assert_eq!(ctl.runtime().phase, TunnelPhase::Starting);
        assert_eq!(backend.starts.load(Ordering::SeqCst), 0);

        // Paused clock auto-advances through the debounce sleep.
        let started = rx.recv().await.expect("start half");
        assert!(matches!(
            started.kind,
            TransitionKind::Started { result: Ok(()), .. }
        ));
        ctl.handle(started);
        assert_eq!(ctl.runtime().phase, TunnelPhase::Up);
        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
        assert_eq!(backend.starts.load(Ordering::SeqCst), 1);
    }
}
