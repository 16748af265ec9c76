//! Request/response bodies that only exist at the HTTP boundary

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::hub::HubStats;
use crate::ledger::Wallet;
use crate::orders::UserId;

/// GET /orders query
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListOrdersQuery {
    /// Filter by status (pending, new, partially_filled, filled, canceled, failed, rejected)
    pub status: Option<String>,
    /// Max rows, newest first
    pub limit: Option<u32>,
}

/// Wallet with the derived available balance
#[derive(Debug, Serialize, ToSchema)]
pub struct WalletData {
    #[schema(example = "USD")]
    pub currency: String,
    #[schema(value_type = String, example = "1000.00")]
    pub balance: Decimal,
    #[schema(value_type = String, example = "500.00")]
    pub locked: Decimal,
    #[schema(value_type = String, example = "500.00")]
    pub available: Decimal,
}

impl From<&Wallet> for WalletData {
    fn from(w: &Wallet) -> Self {
        Self {
            currency: w.currency().to_string(),
            balance: w.balance(),
            locked: w.locked(),
            available: w.available(),
        }
    }
}

/// Body of POST /internal/mock/deposit
#[derive(Debug, Deserialize, ToSchema)]
pub struct MockDepositRequest {
    pub user_id: UserId,
    #[schema(value_type = String, example = "1000.00")]
    pub amount: Decimal,
}

/// Webhook acknowledgement. Always 200 so the broker never redelivers.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    /// applied | ignored | unknown_order | error
    #[schema(example = "applied")]
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Server timestamp in milliseconds
    #[schema(example = 1703494800000_u64)]
    pub timestamp_ms: u64,
    #[schema(example = "a1b2c3d")]
    pub version: String,
    /// Ledger store backend
    #[schema(example = "postgres")]
    pub store: String,
    pub hub: HubStats,
}
