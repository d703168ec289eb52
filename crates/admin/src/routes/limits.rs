use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tixgate_rate_limit::{rate_limit_key, retry_after_secs, RateLimitPolicy};

use crate::state::SharedState;

fn policy_json(policy: &RateLimitPolicy) -> Value {
    json!({
        "window_secs": policy.window_secs(),
        "quota": policy.quota
    })
}

/// GET /api/limits
///
/// Returns the default policy, the effective policy of every route, and the
/// number of keys currently tracked.
pub async fn get_limits(State(state): State<SharedState>) -> Json<Value> {
    let Some(ref limiter) = state.rate_limiter else {
        return Json(json!({ "enabled": false }));
    };

    let policies = limiter.policies();
    let default = policies.default_policy();
    let routes: Vec<Value> = policies
        .routes()
        .iter()
        .map(|rule| {
            let effective = rule.policy.unwrap_or(default);
            json!({
                "host": rule.host,
                "path_prefix": rule.path_prefix,
                "overridden": rule.policy.is_some(),
                "policy": policy_json(&effective)
            })
        })
        .collect();

    Json(json!({
        "enabled": true,
        "default": policy_json(&default),
        "routes": routes,
        "tracked_keys": state.refresh_tracked_keys()
    }))
}

/// Query parameters for the key listing endpoint.
#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    /// Maximum number of entries to return (default: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Number of entries to skip (default: 0).
    #[serde(default)]
    pub offset: usize,
    /// Only keys belonging to this caller.
    pub client: Option<String>,
}

fn default_limit() -> usize {
    100
}

/// GET /api/limits/keys
///
/// Returns a paginated, optionally filtered list of live rate-limit records.
/// Records whose window already ended are skipped.
pub async fn list_keys(
    State(state): State<SharedState>,
    Query(params): Query<KeyQuery>,
) -> Json<Value> {
    let Some(ref limiter) = state.rate_limiter else {
        return Json(json!({
            "total": 0,
            "offset": params.offset,
            "limit": params.limit,
            "entries": []
        }));
    };

    let now = limiter.now_millis();
    // Every path starts with '/', so "{client}:/" cannot match a longer IPv6
    // address that merely starts with `client`.
    let client_prefix = params.client.as_deref().map(|c| rate_limit_key(c, "/"));

    let filtered: Vec<_> = limiter
        .snapshot()
        .into_iter()
        .filter(|(_, record)| now <= record.reset_at)
        .filter(|(key, _)| match client_prefix {
            Some(ref prefix) => key.starts_with(prefix.as_str()),
            None => true,
        })
        .collect();

    let total = filtered.len();

    let page: Vec<Value> = filtered
        .into_iter()
        .skip(params.offset)
        .take(params.limit)
        .map(|(key, record)| {
            json!({
                "key": key,
                "count": record.count,
                "retry_after_secs": retry_after_secs(record.reset_at, now)
            })
        })
        .collect();

    Json(json!({
        "total": total,
        "offset": params.offset,
        "limit": params.limit,
        "entries": page
    }))
}

#[derive(Debug, Deserialize)]
pub struct ResetQuery {
    pub key: String,
}

/// DELETE /api/limits/keys?key=...
///
/// Drops one key's record so its next request opens a fresh window.
pub async fn reset_key(
    State(state): State<SharedState>,
    Query(params): Query<ResetQuery>,
) -> impl IntoResponse {
    let Some(ref limiter) = state.rate_limiter else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "status": "error",
                "message": "rate limiting is disabled"
            })),
        );
    };

    if !limiter.reset_key(&params.key) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "status": "error",
                "message": format!("key '{}' is not tracked", params.key)
            })),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "deleted",
            "key": params.key
        })),
    )
}
