//! Broker Gateway
//!
//! The settlement engine and the market data hub only see [`BrokerGateway`].
//! [`http::HttpBroker`] talks to the broker's REST API; [`fake::FakeBroker`]
//! is deterministic and in-process.

pub mod fake;
pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

use crate::orders::{OrderSide, OrderSize};

pub use fake::FakeBroker;
pub use http::HttpBroker;

/// Largest symbol list accepted by one multi-quote request
pub const MAX_QUOTE_BATCH: usize = 100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("Broker request timed out after {0}ms")]
    Timeout(u64),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Broker resource not found: {0}")]
    NotFound(String),

    #[error("Invalid broker response: {0}")]
    Decode(String),
}

/// Market order, time in force DAY
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub size: OrderSize,
    /// Idempotency token; a retried submission with the same value never
    /// creates a second broker order
    pub client_order_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub broker_order_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Quote {
    pub symbol: String,
    #[schema(value_type = String)]
    pub bid: Decimal,
    #[schema(value_type = String)]
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Saturates on broker prices near `Decimal::MAX` instead of panicking.
    pub fn mid(&self) -> Decimal {
        (self.bid / Decimal::TWO).saturating_add(self.ask / Decimal::TWO)
    }

    pub fn spread(&self) -> Decimal {
        self.ask.saturating_sub(self.bid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AssetInfo {
    pub symbol: String,
    pub name: String,
    pub tradable: bool,
    pub fractionable: bool,
}

#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Get gateway name for logging
    fn name(&self) -> &'static str;

    async fn create_order(&self, req: &CreateOrderRequest) -> Result<OrderAck, BrokerError>;

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError>;

    async fn get_quote(&self, symbol: &str) -> Result<Quote, BrokerError>;

    /// Quotes for up to [`MAX_QUOTE_BATCH`] symbols. Unknown symbols are
    /// absent from the result.
    async fn get_multi_quotes(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Quote>, BrokerError>;

    async fn list_assets(&self) -> Result<Vec<AssetInfo>, BrokerError>;
}

/// Bound a broker call. Elapsed counts as failure, never as success.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, BrokerError>
where
    F: Future<Output = Result<T, BrokerError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BrokerError::Timeout(limit.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quote_mid_and_spread() {
        let quote = Quote {
            symbol: "AAPL".into(),
            bid: dec!(189.90),
            ask: dec!(190.10),
            timestamp: Utc::now(),
        };
        assert_eq!(quote.mid(), dec!(190.00));
        assert_eq!(quote.spread(), dec!(0.20));
    }

    #[test]
    fn test_quote_mid_and_spread_at_decimal_limits() {
        let quote = Quote {
            symbol: "XYZ".into(),
            bid: Decimal::MIN,
            ask: Decimal::MAX,
            timestamp: Utc::now(),
        };
        assert_eq!(quote.spread(), Decimal::MAX);
        assert_eq!(quote.mid(), Decimal::ZERO);

        let quote = Quote {
            bid: Decimal::MAX,
            ..quote
        };
        assert!(quote.mid() > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_with_timeout_elapsed_is_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, BrokerError>(())
        };
        let result = with_timeout(Duration::from_millis(10), slow).await;
        assert_eq!(result, Err(BrokerError::Timeout(10)));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let fast = async { Err::<(), _>(BrokerError::NotFound("x".into())) };
        let result = with_timeout(Duration::from_secs(1), fast).await;
        assert_eq!(result, Err(BrokerError::NotFound("x".into())));
    }
}
