//! Market data passthrough (single quote, tradable assets)

use std::sync::Arc;

use axum::extract::{Path, State};

use super::super::state::AppState;
use super::super::types::{ApiResult, ok};
use crate::broker::{AssetInfo, Quote};

/// Latest quote for one symbol
///
/// GET /quotes/{symbol}
#[utoipa::path(
    get,
    path = "/quotes/{symbol}",
    params(("symbol" = String, Path, description = "Ticker, case-insensitive")),
    responses(
        (status = 200, description = "Latest quote", body = Quote),
        (status = 400, description = "Invalid symbol"),
        (status = 404, description = "Unknown symbol"),
        (status = 503, description = "Broker unavailable")
    ),
    tag = "Market Data"
)]
pub async fn get_quote(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> ApiResult<Quote> {
    ok(state.engine.quote(&symbol).await?)
}

/// Tradable assets
///
/// GET /assets
#[utoipa::path(
    get,
    path = "/assets",
    responses(
        (status = 200, description = "Active assets", body = Vec<AssetInfo>),
        (status = 503, description = "Broker unavailable")
    ),
    tag = "Market Data"
)]
pub async fn get_assets(State(state): State<Arc<AppState>>) -> ApiResult<Vec<AssetInfo>> {
    ok(state.engine.assets().await?)
}
