// WG Auto-Tunnel - REST API Module
// HTTP control surface for the orchestrator, served over a Unix socket

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::Event,
    response::{IntoResponse, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};
use uuid::Uuid;

use wg_autotunnel_common::{spec_store, TunnelSpec};
use wg_autotunnel_core::{ControlRequest, OrchestratorHandle};

/// Shared application state
pub struct AppState {
    pub orchestrator: OrchestratorHandle,
    pub tunnels_tx: watch::Sender<Vec<TunnelSpec>>,
    pub specs_dir: PathBuf,
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

/// API error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// API success response
#[derive(Serialize)]
struct SuccessResponse {
    message: String,
}

#[derive(Serialize)]
struct TunnelSummary {
    id: Uuid,
    name: String,
    interface: String,
    is_primary: bool,
    is_active: bool,
}

#[derive(Serialize)]
struct TunnelsListResponse {
    tunnels: Vec<TunnelSummary>,
}

#[derive(Deserialize)]
struct EnabledRequest {
    enabled: bool,
}

#[derive(Serialize)]
struct Heartbeat {
    r#type: &'static str,
    timestamp: DateTime<Utc>,
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/tunnels", get(list_tunnels))
        .route("/api/tunnels/reload", post(reload_tunnels))
        .route("/api/autotunnel/pause", post(pause))
        .route("/api/autotunnel/resume", post(resume))
        .route("/api/autotunnel/enabled", post(set_enabled))
        .route("/api/restart", post(restart))
        .route("/api/toggle", post(toggle))
        .route("/api/events", get(event_stream))
        .with_state(state)
}

/// Health check endpoint
async fn health() -> &'static str {
    "OK"
}

/// Current orchestrator status snapshot
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.status())
}

/// List the known tunnel specs
async fn list_tunnels(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tunnels = state
        .tunnels_tx
        .borrow()
        .iter()
        .map(|spec| TunnelSummary {
            id: spec.id(),
            name: spec.name().to_string(),
            interface: spec.interface.clone(),
            is_primary: spec.is_primary,
            is_active: spec.is_active,
        })
        .collect();

    Json(TunnelsListResponse { tunnels })
}

/// Re-read the spec directory and publish the new tunnel set
async fn reload_tunnels(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("API: Reloading tunnel specs");

    match spec_store::load_all_specs(&state.specs_dir) {
        Ok(specs) => {
            let count = specs.len();
            let _ = state.tunnels_tx.send(specs);
            (
                StatusCode::OK,
                Json(SuccessResponse {
                    message: format!("Loaded {count} tunnel specs"),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to reload tunnel specs: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn pause(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    submit(&state, ControlRequest::Pause, "Auto-tunnel paused").await
}

async fn resume(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    submit(&state, ControlRequest::Resume, "Auto-tunnel resumed").await
}

async fn set_enabled(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnabledRequest>,
) -> impl IntoResponse {
    let message = if request.enabled {
        "Auto-tunnel enabled"
    } else {
        "Auto-tunnel disabled"
    };
    submit(&state, ControlRequest::SetEnabled(request.enabled), message).await
}

/// Manual restart of the active tunnel
async fn restart(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    submit(&state, ControlRequest::Restart, "Restart submitted").await
}

/// Manual start/stop toggle
async fn toggle(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    submit(&state, ControlRequest::Toggle, "Toggle submitted").await
}

async fn submit(
    state: &AppState,
    request: ControlRequest,
    message: &str,
) -> axum::response::Response {
    info!("API: {:?}", request);
    match state.orchestrator.send(request).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(SuccessResponse {
                message: message.to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to submit control request: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// GET /api/events → SSE stream of tunnel events
async fn event_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.orchestrator.subscribe_events();
    let mut shutdown_rx = state.shutdown_tx.subscribe();

    let tunnel_events = BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().data(json))),
                Err(e) => {
                    error!("Failed to serialize tunnel event: {e}");
                    None
                }
            },
            Err(lagged) => {
                // Slow client; it catches up with future events
                tracing::debug!("Event stream lagged: {:?}, continuing", lagged);
                None
            }
        }
    });

    // Heartbeats keep connections warm and let clients detect liveness
    let merged = stream::select(tunnel_events, heartbeat_stream());

    let shutdown_aware = merged.take_until(async move {
        let _ = shutdown_rx.recv().await;
    });

    Sse::new(shutdown_aware)
}

fn heartbeat_stream() -> impl futures::Stream<Item = Result<Event, Infallible>> + Send + 'static {
    tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(heartbeat_interval()))
        .map(|_| Ok(Event::default().data(heartbeat_payload())))
}

fn heartbeat_payload() -> String {
    let heartbeat = Heartbeat {
        r#type: "heartbeat",
        timestamp: Utc::now(),
    };
    serde_json::to_string(&heartbeat).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(not(test))]
fn heartbeat_interval() -> Duration {
    Duration::from_secs(10)
}

#[cfg(test)]
fn heartbeat_interval() -> Duration {
    Duration::from_millis(100)
}
