//! Hub wire protocol (JSON text frames)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::broker::Quote;

/// Client → Hub
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        symbols: Vec<String>,
    },
    Unsubscribe {
        #[serde(default)]
        symbols: Vec<String>,
    },
    Ping,
}

/// Hub → Client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Quote {
        symbol: String,
        bid: Decimal,
        ask: Decimal,
        mid: Decimal,
        spread: Decimal,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
    Pong,
    /// Symbols now streaming to this client
    Subscribed {
        symbols: Vec<String>,
    },
    Unsubscribed {
        symbols: Vec<String>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

impl From<&Quote> for ServerMessage {
    fn from(q: &Quote) -> Self {
        ServerMessage::Quote {
            symbol: q.symbol.clone(),
            bid: q.bid,
            ask: q.ask,
            mid: q.mid(),
            spread: q.spread(),
            timestamp: q.timestamp,
        }
    }
}
