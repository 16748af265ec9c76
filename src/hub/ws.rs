//! WebSocket endpoint for quote streaming
//!
//! Each connection gets a hub client with a bounded outbound queue. A send
//! task drains the queue and pings on an interval; a receive task parses
//! client frames. The send task also holds a deadline at last frame plus the
//! idle timeout. When it passes with no newer frame the connection is torn
//! down, and its subscriptions go with it.

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::messages::{ClientMessage, ServerMessage};
use super::service::HubHandle;
use crate::config::HubConfig;
use crate::gateway::state::AppState;

/// Endpoint: GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let hub = state.hub.clone();
    let config = state.hub_config.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub, config))
}

/// Milliseconds since `start`, shared between the two pumps.
struct LastSeen {
    start: Instant,
    millis: AtomicU64,
}

impl LastSeen {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            millis: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        self.millis
            .store(self.start.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_ms(&self) -> u64 {
        (self.start.elapsed().as_millis() as u64)
            .saturating_sub(self.millis.load(Ordering::Relaxed))
    }

    /// When the connection goes idle unless another frame arrives first.
    fn idle_deadline(&self, limit: Duration) -> tokio::time::Instant {
        let last = self.start + Duration::from_millis(self.millis.load(Ordering::Relaxed));
        tokio::time::Instant::from_std(last + limit)
    }
}

async fn handle_socket(socket: WebSocket, hub: HubHandle, config: HubConfig) {
    let Some(conn) = hub.connect() else {
        return;
    };
    let client = conn.id;
    let replies = conn.tx;
    let mut outbound = conn.rx;

    let (mut sender, mut receiver) = socket.split();
    let last_seen = Arc::new(LastSeen::new());
    let idle_limit = config.idle_timeout();
    let idle_limit_ms = idle_limit.as_millis() as u64;

    let seen = last_seen.clone();
    let ping_every = config.ping_interval();
    let mut send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_every);
        ping.tick().await;
        let idle = tokio::time::sleep_until(seen.idle_deadline(idle_limit));
        tokio::pin!(idle);
        loop {
            tokio::select! {
                msg = outbound.recv() => {
                    let Some(msg) = msg else { break };
                    let Ok(json) = serde_json::to_string(&msg) else { continue };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
                () = &mut idle => {
                    if seen.idle_ms() >= idle_limit_ms {
                        info!(client, idle_ms = seen.idle_ms(), "WebSocket idle timeout");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                    // A frame arrived since the deadline was set
                    idle.as_mut().reset(seen.idle_deadline(idle_limit));
                }
            }
        }
    });

    let seen = last_seen.clone();
    let hub_for_recv = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            seen.touch();
            match msg {
                Message::Text(text) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Subscribe { symbols }) => {
                            hub_for_recv.subscribe(client, symbols)
                        }
                        Ok(ClientMessage::Unsubscribe { symbols }) => {
                            hub_for_recv.unsubscribe(client, symbols)
                        }
                        Ok(ClientMessage::Ping) => {
                            let _ = replies.try_send(ServerMessage::Pong);
                        }
                        Err(e) => {
                            debug!(client, error = %e, "Malformed client frame");
                            let _ = replies
                                .try_send(ServerMessage::error(format!("invalid message: {}", e)));
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    hub.disconnect(client);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_seen_tracks_idle_time() {
        let seen = LastSeen::new();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(seen.idle_ms() >= 20);
        seen.touch();
        assert!(seen.idle_ms() < 20);
    }

    #[test]
    fn test_idle_deadline_moves_with_touch() {
        let seen = LastSeen::new();
        let limit = Duration::from_millis(500);
        let first = seen.idle_deadline(limit);
        assert!(first <= tokio::time::Instant::now() + limit);

        std::thread::sleep(Duration::from_millis(20));
        seen.touch();
        let second = seen.idle_deadline(limit);
        assert!(second >= first + Duration::from_millis(20));
    }
}
