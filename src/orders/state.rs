//! Order lifecycle states
//!
//! ```text
//! pending ──ack──▶ new ──▶ partially_filled ──▶ filled
//!    │              │              │
//!    │              ├──────────────┴──▶ canceled / rejected
//!    └──▶ failed / canceled
//! ```
//!
//! State IDs are stored as SMALLINT. Terminal states are sinks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum OrderStatus {
    /// Hold taken, broker not yet acknowledged
    Pending = 0,
    /// Broker acknowledged, nothing executed
    New = 10,
    PartiallyFilled = 20,
    /// Terminal
    Filled = 30,
    /// Terminal
    Canceled = -10,
    /// Terminal: broker submission failed, hold released
    Failed = -20,
    /// Terminal: broker refused the order
    Rejected = -30,
}

impl OrderStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Failed | OrderStatus::Rejected
        )
    }

    /// Orders in these states may be canceled by their owner.
    #[inline]
    pub fn is_cancelable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::New)
    }

    #[inline]
    pub const fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(OrderStatus::Pending),
            10 => Some(OrderStatus::New),
            20 => Some(OrderStatus::PartiallyFilled),
            30 => Some(OrderStatus::Filled),
            -10 => Some(OrderStatus::Canceled),
            -20 => Some(OrderStatus::Failed),
            -30 => Some(OrderStatus::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::New => "new",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Failed => "failed",
            OrderStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "new" => Ok(OrderStatus::New),
            "partially_filled" => Ok(OrderStatus::PartiallyFilled),
            "filled" => Ok(OrderStatus::Filled),
            "canceled" | "cancelled" => Ok(OrderStatus::Canceled),
            "failed" => Ok(OrderStatus::Failed),
            "rejected" => Ok(OrderStatus::Rejected),
            other => Err(format!("Unknown order status: {}", other)),
        }
    }
}

impl TryFrom<i16> for OrderStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        OrderStatus::from_id(value).ok_or(())
    }
}
