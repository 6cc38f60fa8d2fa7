//! HTTP API gateway for LocalCoder.
//!
//! Exposes a health check and the v1 API (chat, code generation,
//! explanation, debugging, sessions, stats) on top of one shared
//! [`Coordinator`]. Every request, from any number of clients, funnels into
//! the coordinator's single inference queue.
//!
//! Built on Axum.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{Router, extract::State, http::Method, response::Json, routing::get};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use localcoder_agent::{Coordinator, DEFAULT_MAINTENANCE_INTERVAL, spawn_maintenance};
use localcoder_config::AppConfig;

/// Request bodies above this size are rejected.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub coordinator: Arc<Coordinator>,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model: String,
    pub uptime_secs: i64,
}

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers applied:
/// - Request body size limit (1 MB)
/// - CORS (any origin; the server binds to localhost by default)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    let status = if state.coordinator.is_available() {
        "ok"
    } else {
        "unavailable"
    };
    Json(HealthResponse {
        status: status.into(),
        version: env!("CARGO_PKG_VERSION").into(),
        model: state.coordinator.model_id().to_string(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// Serve the API until Ctrl-C, then persist the response cache.
pub async fn start(
    config: &AppConfig,
    coordinator: Arc<Coordinator>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let maintenance = spawn_maintenance(coordinator.clone(), DEFAULT_MAINTENANCE_INTERVAL);
    let app = build_router(Arc::new(GatewayState::new(coordinator.clone())));

    info!(addr = %addr, model = %coordinator.model_id(), "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    maintenance.abort();
    match coordinator.save_cache_snapshot() {
        Ok(Some(saved)) => info!(entries = saved, "Response cache saved"),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Failed to save response cache"),
    }
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
