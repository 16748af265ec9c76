//! HTTP + WebSocket gateway
//!
//! Thin axum layer over the settlement engine and the market data hub.

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use axum::{
    Router,
    routing::{get, post},
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

// OpenAPI / Swagger UI
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::GatewayConfig;
use crate::hub::ws_handler;
use state::AppState;

/// All routes, state applied.
pub fn build_router(state: Arc<AppState>) -> Router {
    let app = Router::new()
        // Orders
        .route(
            "/orders",
            post(handlers::place_order).get(handlers::list_orders),
        )
        .route(
            "/orders/{id}",
            get(handlers::get_order).delete(handlers::cancel_order),
        )
        // Broker notifications
        .route(
            "/webhooks/broker/orders",
            post(handlers::broker_order_webhook),
        )
        // Account
        .route("/wallet", get(handlers::get_wallet))
        .route("/holdings", get(handlers::get_holdings))
        // Market data
        .route("/quotes/{symbol}", get(handlers::get_quote))
        .route("/assets", get(handlers::get_assets))
        .route("/ws", get(ws_handler))
        // System
        .route("/health", get(handlers::health_check));

    // [SECURITY] Mock API routes - only compiled when 'mock-api' feature is enabled.
    // Production builds MUST be compiled with `--no-default-features` to exclude this.
    #[cfg(feature = "mock-api")]
    let app = app.nest(
        "/internal/mock",
        Router::new().route("/deposit", post(handlers::mock_deposit)),
    );

    app.with_state(state)
        // stateless, added after with_state
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Bind and serve until `shutdown` resolves.
pub async fn run_server(
    config: &GatewayConfig,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {} (port in use?)", addr, e))?;

    tracing::info!(%addr, "Gateway listening");
    tracing::info!("WebSocket endpoint: ws://{}/ws", addr);
    tracing::info!("API Docs: http://{}/docs", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("Gateway stopped");
    Ok(())
}
