//! Order records, requests and broker notifications

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use super::error::SettlementError;
use super::state::OrderStatus;

pub type UserId = i64;

const MAX_SYMBOL_LEN: usize = 16;
/// Largest notional accepted on one order, in account currency
pub const MAX_ORDER_AMOUNT: i64 = 1_000_000_000;
/// Largest share quantity accepted on one order
pub const MAX_ORDER_QTY: i64 = 100_000_000;

/// Local order identifier. Doubles as the broker client order ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(ulid::Ulid);

impl OrderId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrderId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[inline]
    pub fn id(&self) -> i16 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => 2,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(OrderSide::Buy),
            2 => Some(OrderSide::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the user asked for: cash to spend/raise, or a share count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSize {
    Notional(Decimal),
    Quantity(Decimal),
}

/// Local record mirroring one broker order
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Order {
    #[schema(value_type = String, example = "01JA2Z8Q4X7M3V9K6T5R2N1B0C")]
    pub id: OrderId,
    pub user_id: UserId,
    #[schema(example = "AAPL")]
    pub symbol: String,
    pub side: OrderSide,
    /// Requested notional, when submitted by amount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    /// Requested shares, when submitted by quantity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    pub currency: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_order_id: Option<String>,
    /// Cumulative executed shares
    pub filled_qty: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filled_avg_price: Option<Decimal>,
    /// Funds still held against this order (buys)
    pub locked_amount: Decimal,
    /// Shares still committed to this order (sells)
    pub reserved_qty: Decimal,
    /// Fill cost the wallet could not cover
    pub shortfall: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A fresh `pending` order carrying its hold.
    pub fn pending(
        user_id: UserId,
        symbol: String,
        side: OrderSide,
        size: OrderSize,
        currency: String,
        locked_amount: Decimal,
        reserved_qty: Decimal,
    ) -> Self {
        let (amount, quantity) = match size {
            OrderSize::Notional(a) => (Some(a), None),
            OrderSize::Quantity(q) => (None, Some(q)),
        };
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            user_id,
            symbol,
            side,
            amount,
            quantity,
            currency,
            status: OrderStatus::Pending,
            broker_order_id: None,
            filled_qty: Decimal::ZERO,
            filled_avg_price: None,
            locked_amount,
            reserved_qty,
            shortfall: Decimal::ZERO,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn client_order_id(&self) -> String {
        self.id.to_string()
    }

    pub fn size(&self) -> Option<OrderSize> {
        match (self.amount, self.quantity) {
            (Some(a), None) => Some(OrderSize::Notional(a)),
            (None, Some(q)) => Some(OrderSize::Quantity(q)),
            _ => None,
        }
    }

    /// Cumulative cost (buys) or proceeds (sells) of everything filled so far.
    /// Cumulative fill value; `None` only if it does not fit a `Decimal`.
    pub fn filled_value(&self) -> Option<Decimal> {
        match self.filled_avg_price {
            Some(p) => p.checked_mul(self.filled_qty),
            None => Some(Decimal::ZERO),
        }
    }
}

/// POST /orders body
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PlaceOrderRequest {
    #[schema(example = "AAPL")]
    pub symbol: String,
    pub side: OrderSide,
    /// Notional to spend (buy) or raise (sell)
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "500.00")]
    pub amount: Option<Decimal>,
    /// Whole or fractional shares
    #[serde(default, alias = "quantity")]
    #[schema(value_type = Option<String>, example = "3")]
    pub qty: Option<Decimal>,
}

/// A request that passed field validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub size: OrderSize,
}

impl PlaceOrderRequest {
    pub fn validate(&self) -> Result<ValidatedOrder, SettlementError> {
        let symbol = normalize_symbol(&self.symbol)
            .ok_or_else(|| SettlementError::Validation("symbol must be non-empty".into()))?;

        // A zero or negative field counts as not given
        let amount = self.amount.filter(|a| *a > Decimal::ZERO);
        let qty = self.qty.filter(|q| *q > Decimal::ZERO);

        let size = match (amount, qty) {
            (Some(_), Some(_)) => {
                return Err(SettlementError::Validation(
                    "exactly one of amount or qty must be positive".into(),
                ));
            }
            (None, None) => {
                return Err(SettlementError::Validation(
                    "a positive amount or qty is required".into(),
                ));
            }
            (Some(a), None) if a > Decimal::from(MAX_ORDER_AMOUNT) => {
                return Err(SettlementError::Validation(format!(
                    "amount must not exceed {}",
                    MAX_ORDER_AMOUNT
                )));
            }
            (None, Some(q)) if q > Decimal::from(MAX_ORDER_QTY) => {
                return Err(SettlementError::Validation(format!(
                    "qty must not exceed {}",
                    MAX_ORDER_QTY
                )));
            }
            (Some(a), None) => OrderSize::Notional(a),
            (None, Some(q)) => OrderSize::Quantity(q),
        };

        Ok(ValidatedOrder {
            symbol,
            side: self.side,
            size,
        })
    }
}

/// Trim and upper-case a ticker; `None` if empty or not a plausible ticker.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim().to_ascii_uppercase();
    if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN {
        return None;
    }
    symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '/' || c == '-')
        .then_some(symbol)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Fill,
    PartialFill,
    #[serde(alias = "cancelled")]
    Canceled,
    Rejected,
}

impl NotificationKind {
    /// Status the order moves to when this notification applies.
    pub fn target_status(&self) -> OrderStatus {
        match self {
            NotificationKind::Fill => OrderStatus::Filled,
            NotificationKind::PartialFill => OrderStatus::PartiallyFilled,
            NotificationKind::Canceled => OrderStatus::Canceled,
            NotificationKind::Rejected => OrderStatus::Rejected,
        }
    }
}

/// Inbound broker order notification. Quantities are cumulative for the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrokerNotification {
    pub event: NotificationKind,
    /// Broker order ID
    #[serde(alias = "order_id", alias = "brokerOrderId")]
    pub order_id: String,
    #[serde(default, alias = "client_order_id")]
    pub client_order_id: Option<String>,
    #[serde(default, alias = "filled_qty")]
    #[schema(value_type = String, example = "3")]
    pub filled_qty: Decimal,
    #[serde(default, alias = "filled_avg_price")]
    #[schema(value_type = Option<String>, example = "166.00")]
    pub filled_avg_price: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn req(amount: Option<Decimal>, qty: Option<Decimal>) -> PlaceOrderRequest {
        PlaceOrderRequest {
            symbol: " aapl ".into(),
            side: OrderSide::Buy,
            amount,
            qty,
        }
    }

    #[test]
    fn test_validate_normalizes_symbol() {
        let v = req(Some(dec!(500)), None).validate().unwrap();
        assert_eq!(v.symbol, "AAPL");
        assert_eq!(v.size, OrderSize::Notional(dec!(500)));
    }

    #[test]
    fn test_validate_requires_exactly_one_size() {
        assert!(req(None, None).validate().is_err());
        assert!(req(Some(dec!(1)), Some(dec!(1))).validate().is_err());
        assert!(req(Some(dec!(0)), None).validate().is_err());
        assert!(req(None, Some(dec!(-2))).validate().is_err());
        assert!(req(Some(dec!(0)), Some(dec!(-1))).validate().is_err());
        assert_eq!(
            req(None, Some(dec!(0.5))).validate().unwrap().size,
            OrderSize::Quantity(dec!(0.5))
        );
    }

    #[test]
    fn test_validate_treats_non_positive_field_as_absent() {
        assert_eq!(
            req(Some(dec!(500)), Some(dec!(0))).validate().unwrap().size,
            OrderSize::Notional(dec!(500))
        );
        assert_eq!(
            req(Some(dec!(-1)), Some(dec!(3))).validate().unwrap().size,
            OrderSize::Quantity(dec!(3))
        );
    }

    #[test]
    fn test_validate_bounds_order_size() {
        let err = req(None, Some(Decimal::MAX / dec!(10))).validate().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(req(Some(Decimal::MAX), None).validate().is_err());
        assert!(req(Some(Decimal::from(MAX_ORDER_AMOUNT)), None).validate().is_ok());
        assert!(req(None, Some(Decimal::from(MAX_ORDER_QTY) + dec!(0.1))).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_symbol() {
        let mut r = req(Some(dec!(10)), None);
        r.symbol = "   ".into();
        let err = r.validate().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("brk.b"), Some("BRK.B".into()));
        assert_eq!(normalize_symbol("BTC/USD"), Some("BTC/USD".into()));
        assert_eq!(normalize_symbol("AA PL"), None);
        assert_eq!(normalize_symbol(""), None);
    }

    #[test]
    fn test_order_id_roundtrip() {
        let id = OrderId::new();
        let parsed: OrderId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-ulid".parse::<OrderId>().is_err());
    }

    #[test]
    fn test_notification_accepts_camel_and_snake_case() {
        let camel: BrokerNotification = serde_json::from_str(
            r#"{"event":"fill","orderId":"b-1","filledQty":"3","filledAvgPrice":"166.00"}"#,
        )
        .unwrap();
        let snake: BrokerNotification = serde_json::from_str(
            r#"{"event":"fill","order_id":"b-1","filled_qty":3,"filled_avg_price":166.00}"#,
        )
        .unwrap();
        assert_eq!(camel.filled_qty, dec!(3));
        assert_eq!(camel.order_id, snake.order_id);
        assert_eq!(camel.filled_avg_price, Some(dec!(166.00)));
        assert_eq!(snake.filled_qty, dec!(3));
    }

    #[test]
    fn test_notification_cancel_defaults() {
        let n: BrokerNotification =
            serde_json::from_str(r#"{"event":"cancelled","orderId":"b-9"}"#).unwrap();
        assert_eq!(n.event, NotificationKind::Canceled);
        assert_eq!(n.filled_qty, Decimal::ZERO);
        assert!(n.filled_avg_price.is_none());
    }

    #[test]
    fn test_filled_value() {
        let mut order = Order::pending(
            1,
            "AAPL".into(),
            OrderSide::Buy,
            OrderSize::Notional(dec!(500)),
            "USD".into(),
            dec!(500),
            Decimal::ZERO,
        );
        assert_eq!(order.filled_value(), Some(Decimal::ZERO));
        order.filled_qty = dec!(3);
        order.filled_avg_price = Some(dec!(166));
        assert_eq!(order.filled_value(), Some(dec!(498)));
        assert_eq!(order.client_order_id(), order.id.to_string());
    }
}
