//! Server assembly: engine wiring, router construction, and startup.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, response::IntoResponse, routing::get};
use tower_http::cors::CorsLayer;

use crate::config::DashboardConfig;
use crate::dashboard::api::{self, AppState};
use crate::dashboard::ws;
use crate::steps;
use crate::workflow::engine::WorkflowEngine;

/// Broadcast channel capacity; observers lagging past this skip frames.
const BROADCAST_CAPACITY: usize = 256;

/// Configuration for the dashboard server.
#[derive(Default)]
pub struct ServerConfig {
    pub dashboard: DashboardConfig,
    /// Bind all interfaces and allow any CORS origin.
    pub dev_mode: bool,
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .route("/", get(service_banner))
        .with_state(state)
}

/// Plain-text landing page; the dashboard frontend is served
/// separately, this process only exposes the API.
async fn service_banner() -> impl IntoResponse {
    concat!(
        "conveyor — step-gated delivery pipeline dashboard\n",
        "\n",
        "  GET  /health\n",
        "  GET  /ws                        live observer channel\n",
        "  POST /api/submit-requirement    start a run\n",
        "  GET  /api/workflow-status\n",
        "  GET  /api/activity-log?limit=50\n",
        "  GET  /api/modified-files\n",
        "  GET  /api/steps\n",
    )
}

/// Wire the tracker client, the step pipeline, and the engine into the
/// shared application state.
pub fn build_state(config: &DashboardConfig) -> Result<Arc<AppState>> {
    let tracker = steps::tracker::TrackerClient::from_config(&config.tracker)
        .context("Failed to build tracker client")?;
    if tracker.is_canned() {
        tracing::info!("no tracker configured, steps run with canned payloads");
    } else {
        tracing::info!(project_key = tracker.project_key(), "tracker client ready");
    }
    let registry =
        steps::default_pipeline(tracker).context("Failed to assemble step pipeline")?;
    let broadcaster = ws::Broadcaster::new(BROADCAST_CAPACITY);
    let engine = Arc::new(WorkflowEngine::new(registry, broadcaster, &config.workflow));
    Ok(Arc::new(AppState { engine }))
}

/// Start the dashboard server and serve until ctrl-c.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let state = build_state(&config.dashboard)?;
    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let mut addr = config.dashboard.socket_addr()?;
    if config.dev_mode {
        addr.set_ip(std::net::Ipv4Addr::UNSPECIFIED.into());
    }
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    println!("Conveyor dashboard running at http://{}", local_addr);
    tracing::info!(addr = %local_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    println!("\nShutting down...");
}
