// WG Auto-Tunnel - Orchestrator integration tests
// Drive the full event loop against a mock backend over paused time

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use wg_autotunnel_common::{
    ConnectivitySnapshot, HandshakeStatus, ObservationError, Settings, StartError, StopError,
    TunnelEvent, TunnelPhase, TunnelSpec,
};
use wg_autotunnel_core::{
    ControlRequest, Orchestrator, OrchestratorHandle, OrchestratorInputs, SettingsWriter,
    StatusSnapshot, TunnelBackend,
};

const WAIT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct MockBackend {
    start_errors: Mutex<VecDeque<StartError>>,
    started: Mutex<Vec<Uuid>>,
    stops: AtomicUsize,
    handshake_tx: Mutex<Option<mpsc::UnboundedSender<HandshakeStatus>>>,
}

impl MockBackend {
    fn fail_next_start(&self, error: StartError) {
        self.start_errors.lock().unwrap().push_back(error);
    }

    fn started(&self) -> Vec<Uuid> {
        self.started.lock().unwrap().clone()
    }

    fn handshake_sender(&self) -> mpsc::UnboundedSender<HandshakeStatus> {
        self.handshake_tx
            .lock()
            .unwrap()
            .clone()
            .expect("no handshake watcher attached")
    }
}

#[async_trait]
impl TunnelBackend for MockBackend {
    async fn start(&self, spec: &TunnelSpec) -> Result<(), StartError> {
        if let Some(error) = self.start_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.started.lock().unwrap().push(spec.id());
        Ok(())
    }

    async fn stop(&self) -> Result<(), StopError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn observe_handshake(&self, _tunnel_id: Uuid) -> BoxStream<'static, HandshakeStatus> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.handshake_tx.lock().unwrap() = Some(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }
}

struct NullWriter;

impl SettingsWriter for NullWriter {
    fn persist(&self, _settings: &Settings) -> wg_autotunnel_common::Result<()> {
        Ok(())
    }
}

struct Harness {
    backend: Arc<MockBackend>,
    conn_tx: watch::Sender<ConnectivitySnapshot>,
    settings_tx: watch::Sender<Settings>,
    #[allow(dead_code)]
    tunnels_tx: watch::Sender<Vec<TunnelSpec>>,
    handle: OrchestratorHandle,
    events: broadcast::Receiver<TunnelEvent>,
    task: tokio::task::JoinHandle<Result<(), ObservationError>>,
}

impl Harness {
    fn spawn(settings: Settings, tunnels: Vec<TunnelSpec>, conn: ConnectivitySnapshot) -> Self {
        let backend = Arc::new(MockBackend::default());
        let (conn_tx, connectivity) = watch::channel(conn);
        let (settings_tx, settings_rx) = watch::channel(settings);
        let (tunnels_tx, tunnels_rx) = watch::channel(tunnels);

        let inputs = OrchestratorInputs {
            connectivity,
            settings: settings_rx,
            tunnels: tunnels_rx,
        };
        let (orchestrator, handle) =
            Orchestrator::new(backend.clone(), inputs, Box::new(NullWriter));
        let events = handle.subscribe_events();
        let task = tokio::spawn(orchestrator.run());

        Self {
            backend,
            conn_tx,
            settings_tx,
            tunnels_tx,
            handle,
            events,
            task,
        }
    }

    async fn next_event(&mut self) -> TunnelEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn expect_quiet(&mut self) {
        let extra = timeout(WAIT, self.events.recv()).await;
        assert!(extra.is_err(), "unexpected event: {extra:?}");
    }

    async fn wait_status(&self, predicate: impl FnMut(&StatusSnapshot) -> bool) -> StatusSnapshot {
        let mut rx = self.handle.watch_status();
        let snapshot = timeout(WAIT, rx.wait_for(predicate))
            .await
            .expect("timed out waiting for status")
            .expect("status channel closed")
            .clone();
        snapshot
    }

    fn update_settings(&self, mutate: impl FnOnce(&mut Settings)) {
        self.settings_tx.send_modify(mutate);
    }
}

fn spec(name: &str) -> TunnelSpec {
    TunnelSpec::new(
        name.to_string(),
        format!("wg-{name}"),
        "[Interface]\nPrivateKey = x\n".to_string(),
    )
}

fn auto_wifi_settings() -> Settings {
    Settings {
        auto_tunnel_enabled: true,
        tunnel_on_wifi: true,
        ..Default::default()
    }
}

async fn bring_up(harness: &mut Harness, id: Uuid) {
    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Starting { id: got, .. } if got == id
    ));
    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Started { id: got, .. } if got == id
    ));
    harness
        .wait_status(|s| s.phase == TunnelPhase::Up && s.active_tunnel_id == Some(id))
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_untrusted_wifi_brings_tunnel_up() {
    let mut t1 = spec("t1");
    t1.is_primary = true;
    let id = t1.id();
    let mut harness = Harness::spawn(
        auto_wifi_settings(),
        vec![t1],
        ConnectivitySnapshot::wifi("Cafe"),
    );

    bring_up(&mut harness, id).await;
    assert_eq!(harness.backend.started(), vec![id]);
}

#[tokio::test(start_paused = true)]
async fn test_joining_trusted_network_stops_tunnel() {
    let t1 = spec("t1");
    let id = t1.id();
    let mut settings = auto_wifi_settings();
    settings.trusted_network_ssids.insert("HomeNet".to_string());
    let mut harness = Harness::spawn(settings, vec![t1], ConnectivitySnapshot::wifi("Cafe"));
    bring_up(&mut harness, id).await;

    harness
        .conn_tx
        .send(ConnectivitySnapshot::wifi("HomeNet"))
        .unwrap();

    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Stopped { id: Some(got), .. } if got == id
    ));
    harness
        .wait_status(|s| s.phase == TunnelPhase::Idle && s.active_tunnel_id.is_none())
        .await;
    assert_eq!(harness.backend.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_default_change_switches_stop_before_start() {
    let mut t1 = spec("t1");
    t1.is_primary = true;
    let t2 = spec("t2");
    let (id1, id2) = (t1.id(), t2.id());
    let mut harness = Harness::spawn(
        auto_wifi_settings(),
        vec![t1, t2],
        ConnectivitySnapshot::wifi("Cafe"),
    );
    bring_up(&mut harness, id1).await;

    harness.update_settings(|s| s.default_tunnel_id = Some(id2));

    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Starting { id, .. } if id == id2
    ));
    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Stopped { id: Some(id), reason, .. } if id == id1 && reason == "switching"
    ));
    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Started { id, .. } if id == id2
    ));

    // Old tunnel came down before the new one went up
    assert_eq!(harness.backend.started(), vec![id1, id2]);
    assert_eq!(harness.backend.stops.load(Ordering::SeqCst), 1);
    harness
        .wait_status(|s| s.phase == TunnelPhase::Up && s.active_tunnel_id == Some(id2))
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_handshake_latches_and_restart_once() {
    let t1 = spec("t1");
    let id = t1.id();
    let mut settings = auto_wifi_settings();
    settings.ping_restart_enabled = true;
    let mut harness = Harness::spawn(settings, vec![t1], ConnectivitySnapshot::wifi("Cafe"));
    bring_up(&mut harness, id).await;

    let handshakes = harness.backend.handshake_sender();
    handshakes.send(HandshakeStatus::Healthy).unwrap();
    handshakes.send(HandshakeStatus::Healthy).unwrap();

    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Connected { .. }
    ));
    // Second Healthy is latched away; the next event is the failure
    handshakes.send(HandshakeStatus::Unhealthy).unwrap();
    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::ConnectionLost { .. }
    ));

    // Restart policy kicks in exactly once: switch to the same tunnel
    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Starting { id: got, .. } if got == id
    ));
    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Stopped { reason, .. } if reason == "switching"
    ));
    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Started { id: got, .. } if got == id
    ));

    // New generation, fresh latches: the new watcher notifies again
    let handshakes = harness.backend.handshake_sender();
    handshakes.send(HandshakeStatus::Healthy).unwrap();
    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Connected { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_no_restart_without_opt_in() {
    let t1 = spec("t1");
    let id = t1.id();
    let mut harness = Harness::spawn(
        auto_wifi_settings(),
        vec![t1],
        ConnectivitySnapshot::wifi("Cafe"),
    );
    bring_up(&mut harness, id).await;

    let handshakes = harness.backend.handshake_sender();
    handshakes.send(HandshakeStatus::NeverConnected).unwrap();
    handshakes.send(HandshakeStatus::NeverConnected).unwrap();

    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::HandshakeTimeout { .. }
    ));
    // Latched, and no restart attempt follows
    harness.expect_quiet().await;
    assert_eq!(harness.backend.started(), vec![id]);
}

#[tokio::test(start_paused = true)]
async fn test_never_connected_is_not_restarted_even_with_opt_in() {
    let t1 = spec("t1");
    let id = t1.id();
    let mut settings = auto_wifi_settings();
    settings.ping_restart_enabled = true;
    let mut harness = Harness::spawn(settings, vec![t1], ConnectivitySnapshot::wifi("Cafe"));
    bring_up(&mut harness, id).await;

    let handshakes = harness.backend.handshake_sender();
    handshakes.send(HandshakeStatus::NeverConnected).unwrap();

    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::HandshakeTimeout { .. }
    ));
    // A tunnel that never handshakes is misconfigured; cycling it would
    // loop forever, so only a lost connection triggers the restart policy.
    harness.expect_quiet().await;
    assert_eq!(harness.backend.started(), vec![id]);
    assert_eq!(harness.handle.status().phase, TunnelPhase::Up);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_stream_end_leaves_phase_alone() {
    let t1 = spec("t1");
    let id = t1.id();
    let mut harness = Harness::spawn(
        auto_wifi_settings(),
        vec![t1],
        ConnectivitySnapshot::wifi("Cafe"),
    );
    bring_up(&mut harness, id).await;

    // Closing the stream only ends health supervision
    drop(harness.backend.handshake_tx.lock().unwrap().take());
    harness.expect_quiet().await;
    let status = harness.handle.status();
    assert_eq!(status.phase, TunnelPhase::Up);
    assert_eq!(status.active_tunnel_id, Some(id));
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_is_not_retried() {
    let mut t1 = spec("t1");
    t1.is_primary = true;
    let id = t1.id();
    let mut harness = Harness::spawn(
        auto_wifi_settings(),
        vec![t1],
        ConnectivitySnapshot::offline(),
    );
    harness
        .backend
        .fail_next_start(StartError::Backend("wg-quick exited with 1".to_string()));

    harness
        .conn_tx
        .send(ConnectivitySnapshot::wifi("Cafe"))
        .unwrap();

    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Starting { .. }
    ));
    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::StartFailed { id: got, .. } if got == id
    ));
    // Completion alone never re-evaluates; the tunnel stays down
    harness.expect_quiet().await;
    harness
        .wait_status(|s| s.phase == TunnelPhase::Idle && s.active_tunnel_id.is_none())
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_restore_on_boot_in_manual_mode() {
    let mut t1 = spec("t1");
    t1.is_active = true;
    let id = t1.id();
    let settings = Settings {
        restore_on_boot_enabled: true,
        ..Default::default()
    };
    let mut harness = Harness::spawn(settings, vec![t1], ConnectivitySnapshot::offline());

    // Automation is off, yet the last-active tunnel comes back
    bring_up(&mut harness, id).await;
}

#[tokio::test(start_paused = true)]
async fn test_pause_keeps_tunnel_and_resume_reengages() {
    let t1 = spec("t1");
    let id = t1.id();
    let mut settings = auto_wifi_settings();
    settings.trusted_network_ssids.insert("HomeNet".to_string());
    let mut harness = Harness::spawn(settings, vec![t1], ConnectivitySnapshot::wifi("Cafe"));
    bring_up(&mut harness, id).await;

    harness.handle.send(ControlRequest::Pause).await.unwrap();
    harness.wait_status(|s| s.auto_tunnel_paused).await;

    // Paused: a trusted network no longer tears the tunnel down
    harness
        .conn_tx
        .send(ConnectivitySnapshot::wifi("HomeNet"))
        .unwrap();
    harness.expect_quiet().await;

    // Resume applies the suppressed decision
    harness.handle.send(ControlRequest::Resume).await.unwrap();
    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Stopped { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_manual_toggle_starts_then_stops() {
    let mut t1 = spec("t1");
    t1.is_primary = true;
    let id = t1.id();
    let mut harness = Harness::spawn(
        Settings::default(),
        vec![t1],
        ConnectivitySnapshot::wifi("Cafe"),
    );

    // Automation disabled: nothing happens on its own
    harness.expect_quiet().await;

    harness.handle.send(ControlRequest::Toggle).await.unwrap();
    bring_up(&mut harness, id).await;

    harness.handle.send(ControlRequest::Toggle).await.unwrap();
    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Stopped { id: Some(got), .. } if got == id
    ));
    harness
        .wait_status(|s| s.phase == TunnelPhase::Idle)
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_disabling_automation_leaves_tunnel_up() {
    let t1 = spec("t1");
    let id = t1.id();
    let mut harness = Harness::spawn(
        auto_wifi_settings(),
        vec![t1],
        ConnectivitySnapshot::wifi("Cafe"),
    );
    bring_up(&mut harness, id).await;

    // Disabling hands the tunnel back to manual control; it stays up
    harness
        .handle
        .send(ControlRequest::SetEnabled(false))
        .await
        .unwrap();
    harness
        .wait_status(|s| !s.auto_tunnel_enabled && s.phase == TunnelPhase::Up)
        .await;
    harness.expect_quiet().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_restart_cycles_active_tunnel() {
    let t1 = spec("t1");
    let id = t1.id();
    let mut harness = Harness::spawn(
        auto_wifi_settings(),
        vec![t1],
        ConnectivitySnapshot::wifi("Cafe"),
    );
    bring_up(&mut harness, id).await;

    harness.handle.send(ControlRequest::Restart).await.unwrap();

    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Starting { id: got, .. } if got == id
    ));
    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Stopped { reason, .. } if reason == "switching"
    ));
    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Started { id: got, .. } if got == id
    ));
    assert_eq!(harness.backend.started(), vec![id, id]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_tears_down_and_exits() {
    let t1 = spec("t1");
    let id = t1.id();
    let mut harness = Harness::spawn(
        auto_wifi_settings(),
        vec![t1],
        ConnectivitySnapshot::wifi("Cafe"),
    );
    bring_up(&mut harness, id).await;

    harness.handle.send(ControlRequest::Shutdown).await.unwrap();

    assert!(matches!(
        harness.next_event().await,
        TunnelEvent::Stopped { reason, .. } if reason == "shutdown"
    ));

    let result = timeout(WAIT, harness.task)
        .await
        .expect("loop did not exit")
        .expect("loop panicked");
    assert_eq!(result, Ok(()));
}
