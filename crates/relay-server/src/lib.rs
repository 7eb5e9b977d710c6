//! # relay-server
//!
//! WebSocket transport for the Relay runtime. Provides:
//!
//! - `GET /ws`: one socket per client, speaking the `{ type, data }` envelope
//! - `GET /health`: liveness and a few runtime counters

pub mod session;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::{Json, Response},
    routing::get,
};
use relay_config::schema::ServerConfig;
use relay_core::{RelayError, Result};
use relay_runtime::Runtime;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::info;

pub use session::{greeting, handle_command};

/// Shared server state.
pub struct AppState {
    pub config: ServerConfig,
    pub runtime: Runtime,
    pub started: Instant,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
    conversations: usize,
}

/// Build the Axum router.
pub fn build_router(config: ServerConfig, runtime: Runtime) -> Router {
    let cors = config.cors;
    let state = Arc::new(AppState {
        config,
        runtime,
        started: Instant::now(),
    });

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    if cors {
        router = router.layer(CorsLayer::permissive());
    }
    router
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: state.started.elapsed().as_secs(),
        conversations: state.runtime.repository().len(),
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| session::serve_socket(socket, state.runtime.clone()))
}

/// Start the HTTP server.
pub async fn start_server(config: ServerConfig, runtime: Runtime) -> Result<()> {
    let listen = config.listen.clone();
    let router = build_router(config, runtime);

    info!(listen = %listen, "starting WebSocket server");

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| RelayError::Config(format!("failed to bind {listen}: {e}")))?;

    axum::serve(listener, router).await?;

    Ok(())
}
