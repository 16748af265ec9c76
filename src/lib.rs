//! Brokerage Core - order settlement and market data distribution
//!
//! # Modules
//!
//! - [`orders`] - Order model, state machine, settlement engine
//! - [`ledger`] - Wallets and holdings with enforced invariants, store seam
//! - [`broker`] - Broker gateway trait, REST client, in-process fake
//! - [`events`] - Domain events and the message bus publisher seam
//! - [`hub`] - Market data hub: registry, control loop, poller, WebSocket
//! - [`gateway`] - HTTP API (axum) and OpenAPI docs
//! - [`db`] - PostgreSQL pool
//! - [`config`] / [`logging`] - YAML config and tracing setup

pub mod broker;
pub mod config;
pub mod db;
pub mod events;
pub mod gateway;
pub mod hub;
pub mod ledger;
pub mod logging;
pub mod orders;

// Convenient re-exports at crate root
pub use broker::{BrokerError, BrokerGateway, FakeBroker, HttpBroker};
pub use config::AppConfig;
pub use events::{EventPublisher, OrderEvent};
pub use hub::{HubHandle, QuotePoller, spawn_hub};
pub use ledger::{Holding, LedgerStore, MemoryLedgerStore, PgLedgerStore, Wallet};
pub use orders::{Order, OrderId, OrderStatus, SettlementEngine, SettlementError};
