//! Domain events for the message bus
//!
//! Delivery is at-least-once and best-effort: a failed publish is logged by
//! the caller and never undoes a committed ledger change. Consumers
//! deduplicate by `orderId` (and `id` per envelope).

pub mod publisher;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::orders::{Order, OrderSide, OrderStatus, UserId};

pub use publisher::{
    EventPublisher, HttpEventPublisher, LogEventPublisher, MemoryEventPublisher, PublishError,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: String,
    pub user_id: UserId,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    pub broker_order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilled {
    pub order_id: String,
    pub user_id: UserId,
    pub symbol: String,
    pub side: OrderSide,
    /// Cumulative
    pub filled_qty: Decimal,
    pub filled_avg_price: Decimal,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCanceled {
    pub order_id: String,
    pub user_id: UserId,
    pub symbol: String,
    pub side: OrderSide,
    pub filled_qty: Decimal,
    pub released_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    #[serde(rename = "order.created")]
    Created(OrderCreated),
    #[serde(rename = "order.filled")]
    Filled(OrderFilled),
    #[serde(rename = "order.canceled")]
    Canceled(OrderCanceled),
}

impl OrderEvent {
    pub fn created(order: &Order, broker_order_id: &str) -> Self {
        OrderEvent::Created(OrderCreated {
            order_id: order.id.to_string(),
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            side: order.side,
            amount: order.amount,
            quantity: order.quantity,
            broker_order_id: broker_order_id.to_string(),
        })
    }

    pub fn filled(order: &Order) -> Self {
        OrderEvent::Filled(OrderFilled {
            order_id: order.id.to_string(),
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            side: order.side,
            filled_qty: order.filled_qty,
            filled_avg_price: order.filled_avg_price.unwrap_or(Decimal::ZERO),
            status: order.status,
        })
    }

    pub fn canceled(order: &Order, released_amount: Decimal) -> Self {
        OrderEvent::Canceled(OrderCanceled {
            order_id: order.id.to_string(),
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            side: order.side,
            filled_qty: order.filled_qty,
            released_amount,
        })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Created(_) => "order.created",
            OrderEvent::Filled(_) => "order.filled",
            OrderEvent::Canceled(_) => "order.canceled",
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            OrderEvent::Created(e) => &e.order_id,
            OrderEvent::Filled(e) => &e.order_id,
            OrderEvent::Canceled(e) => &e.order_id,
        }
    }
}

/// What goes on the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: OrderEvent,
}

impl EventEnvelope {
    pub fn new(event: OrderEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event,
        }
    }
}
