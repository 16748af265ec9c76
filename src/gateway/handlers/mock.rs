//! Internal mock endpoints
//!
//! [SECURITY WARNING] Development and test only. Compiled in with the
//! `mock-api` feature; production builds use `--no-default-features`.

use std::sync::Arc;

use axum::{Json, extract::State, http::HeaderMap};

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, MockDepositRequest, WalletData, ok};
use super::helpers::{INTERNAL_SECRET_HEADER, secret_matches};

/// Credit a user's wallet without a real funding flow
///
/// POST /internal/mock/deposit
pub async fn mock_deposit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<MockDepositRequest>,
) -> ApiResult<WalletData> {
    if !secret_matches(&headers, INTERNAL_SECRET_HEADER, &state.settlement.internal_secret) {
        return ApiError::forbidden("Access Denied: Missing or Invalid X-Internal-Secret")
            .into_err();
    }
    tracing::warn!(user_id = req.user_id, amount = %req.amount, "Mock deposit");
    let wallet = state.engine.deposit(req.user_id, req.amount).await?;
    ok(WalletData::from(&wallet))
}
