pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tixgate_common::AppConfig;
use tixgate_rate_limit::RateLimiter;
use tower_http::cors::{Any, CorsLayer};

use crate::state::SharedState;

pub use state::{AppState, GatewayMetrics, SharedState as SharedStateType};

/// Build the Axum router with all admin API routes and middleware.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/api/health", get(routes::health::health_check))
        // Prometheus metrics
        .route("/api/metrics", get(routes::metrics::get_metrics))
        // Configuration management
        .route(
            "/api/config",
            get(routes::config::get_config).put(routes::config::update_config),
        )
        // Rate limit inspection
        .route("/api/limits", get(routes::limits::get_limits))
        .route(
            "/api/limits/keys",
            get(routes::limits::list_keys).delete(routes::limits::reset_key),
        )
        // Traffic statistics
        .route("/api/stats", get(routes::stats::get_stats))
        // Attach shared state and middleware
        .with_state(state)
        .layer(cors)
}

/// Start the admin API server on the specified address.
///
/// This function will block until the server is shut down.
pub async fn run_admin_server(state: SharedState, listen_addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!("admin API server listening on {}", listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Convenience function to create a SharedState from an AppConfig and the
/// process-wide limiter.
pub fn new_shared_state(config: AppConfig, rate_limiter: Option<RateLimiter>) -> SharedState {
    Arc::new(AppState::new(config, rate_limiter))
}
