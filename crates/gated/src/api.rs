use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::engine::GateCommand;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /v1/covers
///
/// Returns the engine's current cover snapshot: gate state, availability,
/// and unique id per entity.
#[tracing::instrument(skip(state))]
async fn covers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/covers request");

    let snapshot = state.engine.state_snapshot();
    (StatusCode::OK, Json(snapshot.covers.clone()))
}

/// Request body for POST /v1/covers/:entity_id/command
#[derive(Deserialize)]
struct CommandRequest {
    command: GateCommand,
}

/// Handler for POST /v1/covers/:entity_id/command
///
/// Dispatches an open/close/stop command to the integration owning the
/// entity. Accepted means queued: the reported state only changes once a
/// later poll observes the gate moving.
#[tracing::instrument(skip(state, req))]
async fn cover_command(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> impl IntoResponse {
    tracing::debug!("Handling cover command {} for {}", req.command, entity_id);

    match state.engine.send_cover_command(entity_id, req.command) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            tracing::warn!("Failed to dispatch cover command: {}", e);
            StatusCode::NOT_FOUND
        }
    }
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/covers", get(covers))
        .route("/v1/covers/:entity_id/command", post(cover_command))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP status API server
///
/// Binds to the specified address and serves the API endpoints until the
/// provided shutdown signal is triggered.
pub async fn serve(
    listen: String,
    port: u16,
    engine: Arc<Engine>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, engine });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
