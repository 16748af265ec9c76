//! Order handlers (place, cancel, get, list)

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};

use super::super::state::AppState;
use super::super::types::{ApiResult, ListOrdersQuery, created, ok};
use super::helpers::{extract_user_id, parse_order_id};
use crate::orders::{Order, PlaceOrderRequest};

/// Place a market order
///
/// POST /orders
#[utoipa::path(
    post,
    path = "/orders",
    request_body = PlaceOrderRequest,
    params(("X-User-ID" = i64, Header, description = "Caller user ID")),
    responses(
        (status = 201, description = "Order submitted to the broker", body = Order),
        (status = 400, description = "Invalid parameters"),
        (status = 401, description = "Missing X-User-ID"),
        (status = 402, description = "Insufficient funds"),
        (status = 403, description = "Account inactive"),
        (status = 422, description = "Insufficient shares"),
        (status = 502, description = "Broker rejected the order"),
        (status = 503, description = "Broker unavailable; hold released")
    ),
    tag = "Orders"
)]
pub async fn place_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PlaceOrderRequest>,
) -> ApiResult<Order> {
    let user_id = extract_user_id(&headers)?;
    tracing::info!(user_id, symbol = %req.symbol, side = %req.side, "Place order");
    let order = state.engine.place_order(user_id, &req).await?;
    created(order)
}

/// Cancel an order
///
/// DELETE /orders/{id}
#[utoipa::path(
    delete,
    path = "/orders/{id}",
    params(
        ("id" = String, Path, description = "Order ID"),
        ("X-User-ID" = i64, Header, description = "Caller user ID")
    ),
    responses(
        (status = 200, description = "Order canceled", body = Order),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order not cancelable"),
        (status = 503, description = "Broker unavailable")
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Order> {
    let user_id = extract_user_id(&headers)?;
    let order_id = parse_order_id(&id)?;
    tracing::info!(user_id, %order_id, "Cancel order");
    let order = state.engine.cancel_order(user_id, order_id).await?;
    ok(order)
}

/// Get one order
///
/// GET /orders/{id}
#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(
        ("id" = String, Path, description = "Order ID"),
        ("X-User-ID" = i64, Header, description = "Caller user ID")
    ),
    responses(
        (status = 200, description = "Order", body = Order),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Order not found")
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Order> {
    let user_id = extract_user_id(&headers)?;
    let order_id = parse_order_id(&id)?;
    ok(state.engine.get_order(user_id, order_id).await?)
}

/// List the caller's orders, newest first
///
/// GET /orders?status=&limit=
#[utoipa::path(
    get,
    path = "/orders",
    params(
        ListOrdersQuery,
        ("X-User-ID" = i64, Header, description = "Caller user ID")
    ),
    responses(
        (status = 200, description = "Orders", body = Vec<Order>),
        (status = 400, description = "Unknown status")
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListOrdersQuery>,
) -> ApiResult<Vec<Order>> {
    let user_id = extract_user_id(&headers)?;
    let orders = state
        .engine
        .list_orders(user_id, query.status.as_deref(), query.limit)
        .await?;
    ok(orders)
}
