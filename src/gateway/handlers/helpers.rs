//! Handler helper functions
//!
//! Caller identity and shared-secret checks used by multiple handlers.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;

use super::super::types::ApiError;
use crate::orders::{OrderId, UserId};

/// Caller identity, set by the upstream auth proxy.
pub const USER_ID_HEADER: &str = "X-User-ID";
pub const WEBHOOK_SECRET_HEADER: &str = "X-Webhook-Secret";
pub const INTERNAL_SECRET_HEADER: &str = "X-Internal-Secret";

/// Missing header → 401, malformed → 400.
pub fn extract_user_id(headers: &HeaderMap) -> Result<UserId, ApiError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing X-User-ID header"))?;

    match raw.trim().parse::<UserId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError::bad_request("Invalid X-User-ID format")),
    }
}

/// Unparseable IDs cannot name an existing order.
pub fn parse_order_id(raw: &str) -> Result<OrderId, ApiError> {
    raw.parse::<OrderId>()
        .map_err(|_| ApiError::not_found(format!("Order not found: {}", raw)))
}

/// True when `header` carries exactly `expected`.
pub fn secret_matches(headers: &HeaderMap, header: &str, expected: &str) -> bool {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected)
}

/// Get current time in milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
