//! Order Settlement
//!
//! Order records and their state machine, the pure transition function that
//! settles broker notifications, and the engine that ties store, broker and
//! event bus together.

pub mod engine;
pub mod error;
pub mod reconcile;
pub mod state;
pub mod types;

pub use engine::{ReconcileOutcome, SettlementEngine};
pub use error::SettlementError;
pub use reconcile::{Skip, Transition};
pub use state::OrderStatus;
pub use types::{
    BrokerNotification, NotificationKind, Order, OrderId, OrderSide, OrderSize,
    PlaceOrderRequest, UserId, ValidatedOrder, normalize_symbol,
};
