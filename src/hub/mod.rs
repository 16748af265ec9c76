//! Market Data Distribution Hub
//!
//! Live quote streams for many WebSocket viewers. A single control loop owns
//! the symbol↔client registry; a poller fetches quotes for the distinct
//! subscribed symbols in broker-sized batches and the hub fans them out into
//! bounded per-client buffers.

pub mod messages;
pub mod poller;
pub mod registry;
pub mod service;
pub mod ws;

pub use messages::{ClientMessage, ServerMessage};
pub use poller::{PollReport, QuotePoller};
pub use registry::{ClientId, Registry};
pub use service::{ClientConnection, HubHandle, HubStats, spawn_hub};
pub use ws::ws_handler;
