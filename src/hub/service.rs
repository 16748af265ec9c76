//! Hub control loop
//!
//! One task owns the registry and every client's outbound sender. Socket
//! tasks and the poller talk to it only through [`HubHandle`], so all
//! registry mutations and fan-out reads happen on a single writer.
//!
//! Fan-out uses `try_send` into each client's bounded buffer: a full buffer
//! drops that update for that client and the loop moves on.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::messages::ServerMessage;
use super::registry::{ClientId, Registry};
use crate::broker::Quote;
use crate::config::HubConfig;
use crate::orders::normalize_symbol;

enum HubCommand {
    Register {
        client: ClientId,
        tx: mpsc::Sender<ServerMessage>,
    },
    Unregister {
        client: ClientId,
    },
    Subscribe {
        client: ClientId,
        symbols: Vec<String>,
    },
    Unsubscribe {
        client: ClientId,
        symbols: Vec<String>,
    },
    Symbols(oneshot::Sender<Vec<String>>),
    Stats(oneshot::Sender<HubStats>),
    Publish(Vec<Quote>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct HubStats {
    pub clients: usize,
    pub symbols: usize,
    /// Updates dropped on full client buffers since start
    pub dropped: u64,
}

/// Per-publish fan-out counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FanOut {
    delivered: usize,
    dropped: usize,
}

struct ClientSlot {
    tx: mpsc::Sender<ServerMessage>,
    dropped: u64,
}

/// A registered client: its ID, its outbound queue, and a sender for
/// direct replies (pong, errors) from the socket's read side.
pub struct ClientConnection {
    pub id: ClientId,
    pub tx: mpsc::Sender<ServerMessage>,
    pub rx: mpsc::Receiver<ServerMessage>,
}

struct Hub {
    registry: Registry,
    clients: HashMap<ClientId, ClientSlot>,
    max_symbols_per_client: usize,
    dropped_total: u64,
}

impl Hub {
    fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { client, tx } => {
                self.clients.insert(client, ClientSlot { tx, dropped: 0 });
                info!(client, clients = self.clients.len(), "Hub client registered");
            }
            HubCommand::Unregister { client } => self.unregister(client),
            HubCommand::Subscribe { client, symbols } => self.subscribe(client, symbols),
            HubCommand::Unsubscribe { client, symbols } => self.unsubscribe(client, symbols),
            HubCommand::Symbols(reply) => {
                let _ = reply.send(self.registry.symbols());
            }
            HubCommand::Stats(reply) => {
                let _ = reply.send(HubStats {
                    clients: self.clients.len(),
                    symbols: self.registry.symbol_count(),
                    dropped: self.dropped_total,
                });
            }
            HubCommand::Publish(quotes) => {
                let fan_out = self.publish(&quotes);
                if fan_out.dropped > 0 {
                    warn!(
                        quotes = quotes.len(),
                        delivered = fan_out.delivered,
                        dropped = fan_out.dropped,
                        "Slow clients missed quote updates"
                    );
                } else {
                    debug!(quotes = quotes.len(), delivered = fan_out.delivered, "Quotes fanned out");
                }
            }
        }
    }

    fn unregister(&mut self, client: ClientId) {
        let removed = self.registry.remove_client(client);
        if let Some(slot) = self.clients.remove(&client) {
            info!(
                client,
                subscriptions = removed,
                dropped = slot.dropped,
                clients = self.clients.len(),
                "Hub client unregistered"
            );
        }
    }

    fn reply(&self, client: ClientId, msg: ServerMessage) {
        if let Some(slot) = self.clients.get(&client) {
            let _ = slot.tx.try_send(msg);
        }
    }

    fn subscribe(&mut self, client: ClientId, symbols: Vec<String>) {
        if !self.clients.contains_key(&client) {
            return;
        }
        if symbols.is_empty() {
            self.reply(client, ServerMessage::error("subscribe requires at least one symbol"));
            return;
        }

        let mut added = Vec::new();
        let mut invalid = Vec::new();
        for raw in symbols {
            let Some(symbol) = normalize_symbol(&raw) else {
                invalid.push(raw);
                continue;
            };
            if self.registry.is_subscribed(client, &symbol) {
                added.push(symbol);
                continue;
            }
            if self.registry.subscription_count(client) >= self.max_symbols_per_client {
                self.reply(
                    client,
                    ServerMessage::error(format!(
                        "subscription limit of {} symbols reached",
                        self.max_symbols_per_client
                    )),
                );
                break;
            }
            self.registry.subscribe(client, &symbol);
            added.push(symbol);
        }

        if !invalid.is_empty() {
            self.reply(
                client,
                ServerMessage::error(format!("invalid symbols: {}", invalid.join(", "))),
            );
        }
        if !added.is_empty() {
            debug!(client, symbols = ?added, "Subscribed");
            self.reply(client, ServerMessage::Subscribed { symbols: added });
        }
    }

    fn unsubscribe(&mut self, client: ClientId, symbols: Vec<String>) {
        if !self.clients.contains_key(&client) {
            return;
        }
        let removed: Vec<String> = symbols
            .iter()
            .filter_map(|raw| normalize_symbol(raw))
            .filter(|symbol| self.registry.unsubscribe(client, symbol))
            .collect();
        debug!(client, symbols = ?removed, "Unsubscribed");
        self.reply(client, ServerMessage::Unsubscribed { symbols: removed });
    }

    fn publish(&mut self, quotes: &[Quote]) -> FanOut {
        let mut fan_out = FanOut::default();
        let mut closed = Vec::new();

        for quote in quotes {
            let msg = ServerMessage::from(quote);
            for client in self.registry.clients_for(&quote.symbol) {
                let Some(slot) = self.clients.get_mut(&client) else {
                    continue;
                };
                match slot.tx.try_send(msg.clone()) {
                    Ok(()) => fan_out.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        slot.dropped += 1;
                        fan_out.dropped += 1;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(client),
                }
            }
        }

        self.dropped_total += fan_out.dropped as u64;
        for client in closed {
            self.unregister(client);
        }
        fan_out
    }
}

/// Cloneable entry point to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
    next_client: Arc<AtomicU64>,
    client_buffer: usize,
}

impl HubHandle {
    /// Register a new client with a bounded outbound buffer. `None` once the
    /// hub has stopped.
    pub fn connect(&self) -> Option<ClientConnection> {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.client_buffer);
        self.tx
            .send(HubCommand::Register {
                client: id,
                tx: tx.clone(),
            })
            .ok()?;
        Some(ClientConnection { id, tx, rx })
    }

    pub fn disconnect(&self, client: ClientId) {
        let _ = self.tx.send(HubCommand::Unregister { client });
    }

    pub fn subscribe(&self, client: ClientId, symbols: Vec<String>) {
        let _ = self.tx.send(HubCommand::Subscribe { client, symbols });
    }

    pub fn unsubscribe(&self, client: ClientId, symbols: Vec<String>) {
        let _ = self.tx.send(HubCommand::Unsubscribe { client, symbols });
    }

    /// Distinct subscribed symbols. `None` once the hub has stopped.
    pub async fn symbols(&self) -> Option<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(HubCommand::Symbols(reply)).ok()?;
        rx.await.ok()
    }

    pub async fn stats(&self) -> Option<HubStats> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(HubCommand::Stats(reply)).ok()?;
        rx.await.ok()
    }

    /// Hand quotes to the hub for fan-out. Returns false once it has stopped.
    pub fn publish(&self, quotes: Vec<Quote>) -> bool {
        if quotes.is_empty() {
            return !self.tx.is_closed();
        }
        self.tx.send(HubCommand::Publish(quotes)).is_ok()
    }
}

/// Start the hub task. It runs until every [`HubHandle`] is dropped.
pub fn spawn_hub(config: &HubConfig) -> (HubHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut hub = Hub {
        registry: Registry::new(),
        clients: HashMap::new(),
        max_symbols_per_client: config.max_symbols_per_client,
        dropped_total: 0,
    };

    let task = tokio::spawn(async move {
        info!("Market data hub started");
        while let Some(cmd) = rx.recv().await {
            hub.handle(cmd);
        }
        info!(dropped = hub.dropped_total, "Market data hub stopped");
    });

    let handle = HubHandle {
        tx,
        next_client: Arc::new(AtomicU64::new(1)),
        client_buffer: config.client_buffer.max(1),
    };
    (handle, task)
}
