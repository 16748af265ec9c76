//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::broker::{AssetInfo, Quote};
use crate::gateway::types::{HealthResponse, WalletData, WebhookAck};
use crate::hub::HubStats;
use crate::ledger::Holding;
use crate::orders::{
    BrokerNotification, NotificationKind, Order, OrderSide, OrderStatus, PlaceOrderRequest,
};

/// Shared-secret header the broker sends with every webhook call
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "webhook_secret",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-Webhook-Secret",
                    "Required when settlement.webhook_secret is configured",
                ))),
            );
        }
    }
}

/// Main API Documentation struct
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Brokerage Core API",
        version = "1.0.0",
        description = "Order settlement and market data for retail equity trading. \
                       Quotes stream over the WebSocket endpoint at /ws.",
        license(name = "MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::order::place_order,
        crate::gateway::handlers::order::cancel_order,
        crate::gateway::handlers::order::get_order,
        crate::gateway::handlers::order::list_orders,
        crate::gateway::handlers::webhook::broker_order_webhook,
        crate::gateway::handlers::account::get_wallet,
        crate::gateway::handlers::account::get_holdings,
        crate::gateway::handlers::market::get_quote,
        crate::gateway::handlers::market::get_assets,
        crate::gateway::handlers::health::health_check,
    ),
    components(
        schemas(
            Order,
            OrderSide,
            OrderStatus,
            PlaceOrderRequest,
            BrokerNotification,
            NotificationKind,
            WebhookAck,
            WalletData,
            Holding,
            Quote,
            AssetInfo,
            HealthResponse,
            HubStats,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Orders", description = "Order placement and management (X-User-ID required)"),
        (name = "Webhooks", description = "Broker order notifications"),
        (name = "Account", description = "Wallet and holdings (X-User-ID required)"),
        (name = "Market Data", description = "Quotes and tradable assets"),
        (name = "System", description = "Health checks and system info")
    )
)]
pub struct ApiDoc;
