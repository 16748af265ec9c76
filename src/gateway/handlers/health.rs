//! Health check handler

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};

use super::super::state::AppState;
use super::super::types::{ApiResponse, HealthResponse, error_codes};
use super::helpers::now_ms;

/// Health check endpoint
///
/// - Healthy: 200 OK + {code: 0, data: {timestamp_ms, version, store, hub}}
/// - Store unreachable or hub stopped: 503 + {code: 5001, msg: "unavailable"}
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse, content_type = "application/json"),
        (status = 503, description = "Service unavailable")
    ),
    tag = "System"
)]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let store = state.engine.store();
    let store_ok = match store.health_check().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(store = store.name(), error = %e, "Health check: store unreachable");
            false
        }
    };
    let hub = state.hub.stats().await;
    if hub.is_none() {
        tracing::error!("Health check: market data hub stopped");
    }

    match (store_ok, hub) {
        (true, Some(hub)) => (
            StatusCode::OK,
            Json(ApiResponse::success(HealthResponse {
                timestamp_ms: now_ms(),
                version: env!("GIT_HASH").to_string(),
                store: store.name().to_string(),
                hub,
            })),
        ),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse {
                code: error_codes::SERVICE_UNAVAILABLE,
                msg: "unavailable".to_string(),
                data: None,
            }),
        ),
    }
}
