//! API Response types and error codes
//!
//! - `ApiResponse<T>`: Unified response wrapper
//! - `ApiError` / `ApiResult<T>`: handler error path, rendered as `ApiResponse<()>`
//! - `error_codes`: Standard error code constants

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::orders::SettlementError;

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// All API responses follow this structure:
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Response code: 0 for success, non-zero for errors
    #[schema(example = 0)]
    pub code: i32,
    /// Response message
    #[schema(example = "ok")]
    pub msg: String,
    /// Response data (only present when code == 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Create success response
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    /// Create error response
    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

// ============================================================================
// Handler Results
// ============================================================================

/// Error half of every handler result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error_codes::MISSING_AUTH, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, error_codes::AUTH_FAILED, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error_codes::ORDER_NOT_FOUND, msg)
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiResponse::<()>::error(self.code, self.msg)),
        )
            .into_response()
    }
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = match &e {
            SettlementError::Validation(_) => error_codes::INVALID_PARAMETER,
            SettlementError::InsufficientFunds { .. } => error_codes::INSUFFICIENT_BALANCE,
            SettlementError::InsufficientShares { .. } => error_codes::INSUFFICIENT_SHARES,
            SettlementError::AccountInactive => error_codes::ACCOUNT_INACTIVE,
            SettlementError::Forbidden => error_codes::FORBIDDEN,
            SettlementError::NotFound(_) => error_codes::ORDER_NOT_FOUND,
            SettlementError::OrderNotCancelable(_) => error_codes::ORDER_NOT_CANCELABLE,
            SettlementError::BrokerRejected(_) => error_codes::BROKER_REJECTED,
            SettlementError::BrokerUnavailable(_) => error_codes::SERVICE_UNAVAILABLE,
            SettlementError::Internal(_) => error_codes::INTERNAL_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %e, code = e.code(), "Request failed");
        } else {
            tracing::debug!(error = %e, code = e.code(), "Request rejected");
        }
        Self::new(status, code, e.to_string())
    }
}

/// 200 with data
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

/// 201 with the created resource
pub fn created<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

// ============================================================================
// Error Codes
// ============================================================================

/// Standard API error codes
pub mod error_codes {
    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_BALANCE: i32 = 1002;
    pub const INSUFFICIENT_SHARES: i32 = 1004;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const AUTH_FAILED: i32 = 2002;
    pub const ACCOUNT_INACTIVE: i32 = 2003;
    pub const FORBIDDEN: i32 = 2004;

    // Resource errors (4xxx)
    pub const ORDER_NOT_FOUND: i32 = 4001;
    pub const ORDER_NOT_CANCELABLE: i32 = 4002;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const BROKER_REJECTED: i32 = 5002;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_settlement_errors_map_to_status_and_code() {
        let cases = [
            (
                SettlementError::Validation("bad".into()),
                StatusCode::BAD_REQUEST,
                error_codes::INVALID_PARAMETER,
            ),
            (
                SettlementError::InsufficientFunds {
                    available: Decimal::ONE,
                    required: Decimal::TEN,
                },
                StatusCode::PAYMENT_REQUIRED,
                error_codes::INSUFFICIENT_BALANCE,
            ),
            (
                SettlementError::Forbidden,
                StatusCode::FORBIDDEN,
                error_codes::FORBIDDEN,
            ),
            (
                SettlementError::OrderNotCancelable("filled".into()),
                StatusCode::CONFLICT,
                error_codes::ORDER_NOT_CANCELABLE,
            ),
            (
                SettlementError::BrokerUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                error_codes::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert_eq!(api.code, code);
        }
    }

    #[test]
    fn test_error_body_has_no_data() {
        let json = serde_json::to_value(ApiResponse::<()>::error(1001, "bad")).unwrap();
        assert_eq!(json, serde_json::json!({"code": 1001, "msg": "bad"}));
    }
}
