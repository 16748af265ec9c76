//! Wallet and holdings queries

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap};

use super::super::state::AppState;
use super::super::types::{ApiResult, WalletData, ok};
use super::helpers::extract_user_id;
use crate::ledger::Holding;

/// Caller's cash wallet
///
/// GET /wallet
#[utoipa::path(
    get,
    path = "/wallet",
    params(("X-User-ID" = i64, Header, description = "Caller user ID")),
    responses(
        (status = 200, description = "Wallet; zero balances if never funded", body = WalletData),
        (status = 401, description = "Missing X-User-ID")
    ),
    tag = "Account"
)]
pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<WalletData> {
    let user_id = extract_user_id(&headers)?;
    let wallet = state.engine.wallet(user_id).await?;
    ok(WalletData::from(&wallet))
}

/// Caller's share positions
///
/// GET /holdings
#[utoipa::path(
    get,
    path = "/holdings",
    params(("X-User-ID" = i64, Header, description = "Caller user ID")),
    responses(
        (status = 200, description = "Non-empty holdings", body = Vec<Holding>),
        (status = 401, description = "Missing X-User-ID")
    ),
    tag = "Account"
)]
pub async fn get_holdings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Vec<Holding>> {
    let user_id = extract_user_id(&headers)?;
    ok(state.engine.holdings(user_id).await?)
}
