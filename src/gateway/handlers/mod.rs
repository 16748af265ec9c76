//! HTTP handlers
//!
//! Caller identity comes from the `X-User-ID` header set by the upstream
//! auth proxy; the webhook authenticates with a shared secret instead.

pub mod account;
pub mod health;
pub mod helpers;
pub mod market;
#[cfg(feature = "mock-api")]
pub mod mock;
pub mod order;
pub mod webhook;

pub use account::{get_holdings, get_wallet};
pub use health::health_check;
pub use market::{get_assets, get_quote};
#[cfg(feature = "mock-api")]
pub use mock::mock_deposit;
pub use order::{cancel_order, get_order, list_orders, place_order};
pub use webhook::broker_order_webhook;

