use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tixgate_common::AppConfig;
use tixgate_rate_limit::PolicyResolver;

use crate::state::SharedState;

/// GET /api/config
///
/// Returns the current gateway configuration as JSON.
pub async fn get_config(State(state): State<SharedState>) -> impl IntoResponse {
    let config = state.config.read().expect("config lock poisoned");
    Json(serde_json::to_value(&*config).unwrap_or(json!({"error": "serialization failed"})))
}

/// PUT /api/config
///
/// Accepts a full configuration as JSON, validates it, replaces the stored
/// configuration and swaps the limiter's policy table.
///
/// Only rate-limit policies are applied live. A body that changes anything
/// read at startup (see [`AppConfig::restart_only_changes`]) is rejected with
/// `400` and the stored configuration is left as is.
pub async fn update_config(
    State(state): State<SharedState>,
    Json(new_config): Json<AppConfig>,
) -> impl IntoResponse {
    if let Err(e) = new_config.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "error",
                "message": format!("validation failed: {}", e)
            })),
        );
    }

    let mut config = state.config.write().expect("config lock poisoned");

    let restart_only = config.restart_only_changes(&new_config);
    if !restart_only.is_empty() {
        tracing::warn!(fields = ?restart_only, "rejected config update touching startup settings");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "error",
                "message": format!("requires a restart to change: {}", restart_only.join(", ")),
                "fields": restart_only
            })),
        );
    }

    if let Some(ref limiter) = state.rate_limiter {
        limiter.reload(PolicyResolver::from_config(&new_config));
    }
    *config = new_config;

    tracing::info!("configuration updated via admin API");

    (
        StatusCode::OK,
        Json(json!({
            "status": "updated"
        })),
    )
}
