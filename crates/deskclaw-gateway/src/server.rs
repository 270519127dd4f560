//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use deskclaw_core::error::{DeskclawError, Result};
use deskclaw_scheduler::Scheduler;

/// Shared state for the control API.
#[derive(Clone)]
pub struct AppState {
    /// The scheduler handle — explicitly passed, never a global.
    pub scheduler: Arc<Scheduler>,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/v1/status", get(super::routes::status))
        .route("/api/v1/entries", get(super::routes::list_entries))
        .route("/api/v1/executions", get(super::routes::list_executions))
        .route(
            "/api/v1/entries/{id}/enable",
            post(super::routes::enable_entry),
        )
        .route(
            "/api/v1/entries/{id}/disable",
            post(super::routes::disable_entry),
        )
        .route("/api/v1/entries/{id}/run", post(super::routes::run_entry))
        .route("/api/v1/entries/{id}", delete(super::routes::remove_entry))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind and serve until the process exits.
pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DeskclawError::Config(format!("gateway bind {addr}: {e}")))?;
    tracing::info!("🌐 Control API listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
