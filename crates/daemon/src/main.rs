// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 WG Auto-Tunnel Contributors

// WG Auto-Tunnel - Daemon
// Wires the orchestration core to wg-quick, the connectivity watcher,
// the TOML stores, and the Unix-socket control API

mod api;
mod config;
mod connectivity;
mod notifier;
mod pidfile;
mod settings_store;
mod wg_quick;

use std::sync::Arc;

use anyhow::{Context, Result};
use hyper_util::rt::TokioIo;
use tokio::net::UnixListener;
use tokio::sync::watch;
use tower::Service;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wg_autotunnel_common::spec_store;
use wg_autotunnel_core::{
    ControlRequest, Orchestrator, OrchestratorHandle, OrchestratorInputs,
};

use api::{create_router, AppState};
use config::DaemonConfig;
use settings_store::{PersistingSettingsWriter, SettingsStore};
use wg_quick::WgQuickBackend;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wg_autotunneld=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("WG Auto-Tunnel Daemon starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // PID file prevents a second instance
    let _pid_guard = pidfile::PidFile::acquire_default()
        .context("Failed to create PID file - another daemon may already be running")?;

    let daemon_config = DaemonConfig::load()?;

    // Persisted user settings
    let settings_store = SettingsStore::new(&daemon_config.settings_path);
    let settings = settings_store
        .load()
        .context("Failed to load settings")?;
    let (settings_tx, settings_rx) = watch::channel(settings);

    // Tunnel specs from the TOML spec directory
    let specs = spec_store::load_all_specs(&daemon_config.specs_dir)
        .context("Failed to load tunnel specs")?;
    info!(
        "Loaded {} tunnel specs from {}",
        specs.len(),
        daemon_config.specs_dir.display()
    );
    let (tunnels_tx, tunnels_rx) = watch::channel(specs);

    // Connectivity watcher
    let (conn_tx, conn_rx) = watch::channel(Default::default());
    let _watcher = connectivity::spawn_watcher(conn_tx, daemon_config.connectivity_poll_interval());

    // Backend and orchestrator
    let backend = Arc::new(WgQuickBackend::new(
        config::runtime_dir()?,
        daemon_config.handshake_poll_interval(),
    ));
    let inputs = OrchestratorInputs {
        connectivity: conn_rx,
        settings: settings_rx,
        tunnels: tunnels_rx,
    };
    let writer = PersistingSettingsWriter::new(settings_store, settings_tx);
    let (orchestrator, handle) = Orchestrator::new(backend, inputs, Box::new(writer));

    // Log every tunnel event
    let mut event_rx = handle.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            info!("Tunnel event: {:?}", event);
        }
    });

    // Desktop notifications
    if daemon_config.notifications_enabled {
        let _notifier = notifier::spawn(
            handle.subscribe_events(),
            tunnels_tx.subscribe(),
            handle.clone(),
        );
    }

    let orchestrator_task = tokio::spawn(orchestrator.run());

    // Shutdown broadcast for graceful SSE stream termination
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let state = Arc::new(AppState {
        orchestrator: handle.clone(),
        tunnels_tx,
        specs_dir: daemon_config.specs_dir.clone(),
        shutdown_tx: shutdown_tx.clone(),
    });

    let app = create_router(state);

    serve_unix_socket(app, handle, orchestrator_task, shutdown_tx).await?;

    info!("Daemon shut down");
    Ok(())
}

/// Serve the API on a Unix domain socket (local-only)
async fn serve_unix_socket(
    app: axum::Router,
    orchestrator: OrchestratorHandle,
    orchestrator_task: tokio::task::JoinHandle<
        std::result::Result<(), wg_autotunnel_common::ObservationError>,
    >,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
) -> Result<()> {
    let socket_path = config::socket_path()?;

    // Remove a socket file left over from an unclean exit
    if socket_path.exists() {
        std::fs::remove_file(&socket_path).context("Failed to remove existing socket file")?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create runtime directory")?;
    }

    let listener = UnixListener::bind(&socket_path).context(format!(
        "Failed to bind to socket: {}",
        socket_path.display()
    ))?;

    // The socket's file mode is the API's entire access control
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))
            .context("Failed to set socket permissions")?;
    }

    info!("Daemon listening on Unix socket: {}", socket_path.display());
    info!("Daemon started successfully");

    // Shutdown pipeline: signal -> orchestrator teardown -> SSE close ->
    // stop accepting connections
    let (shutdown_signal_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let shutdown_broadcast = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_shutdown(orchestrator, orchestrator_task).await;
        let _ = shutdown_broadcast.send(());
        let _ = shutdown_signal_tx.send(()).await;
    });

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down server...");
                break;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _addr)) => {
                        let app = app.clone();

                        tokio::spawn(async move {
                            let stream = TokioIo::new(stream);

                            let hyper_service = hyper::service::service_fn(move |request: hyper::Request<hyper::body::Incoming>| {
                                let mut app = app.clone();
                                async move {
                                    app.call(request).await
                                }
                            });

                            if let Err(err) = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                                .serve_connection_with_upgrades(stream, hyper_service)
                                .await
                            {
                                // Client disconnects (Ctrl+C on a watch command) are normal
                                let err_msg = err.to_string();
                                if err_msg.contains("connection closed") || err_msg.contains("Broken pipe") {
                                    debug!("Client disconnected: {}", err);
                                } else {
                                    error!("Error serving connection: {}", err);
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }

    if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then bring the tunnel down through the
/// orchestrator and wait for its loop to drain.
async fn wait_for_shutdown(
    orchestrator: OrchestratorHandle,
    orchestrator_task: tokio::task::JoinHandle<
        std::result::Result<(), wg_autotunnel_common::ObservationError>,
    >,
) {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        };
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down");
    }

    if orchestrator.send(ControlRequest::Shutdown).await.is_err() {
        warn!("Orchestrator already stopped");
        return;
    }

    match orchestrator_task.await {
        Ok(Ok(())) => info!("Orchestrator drained"),
        Ok(Err(e)) => error!("Orchestrator exited with error: {}", e),
        Err(e) => error!("Orchestrator task failed: {}", e),
    }
}
