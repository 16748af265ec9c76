use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

use super::{EventEnvelope, OrderEvent};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    #[error("Message bus unreachable: {0}")]
    Transport(String),

    #[error("Message bus rejected event with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, event: OrderEvent) -> Result<(), PublishError>;
}

/// POSTs each envelope as JSON to the bus ingress.
pub struct HttpEventPublisher {
    client: Client,
    endpoint: String,
}

impl HttpEventPublisher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn publish(&self, event: OrderEvent) -> Result<(), PublishError> {
        let envelope = EventEnvelope::new(event);
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Event-Type", envelope.event.event_type())
            .json(&envelope)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PublishError::Rejected(response.status().as_u16()));
        }
        tracing::debug!(event_id = %envelope.id, event_type = envelope.event.event_type(), "Event published");
        Ok(())
    }
}

/// Writes events to the log only. Used when no bus endpoint is configured.
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, event: OrderEvent) -> Result<(), PublishError> {
        let envelope = EventEnvelope::new(event);
        match serde_json::to_string(&envelope) {
            Ok(json) => tracing::info!(target: crate::logging::EVENTS_TARGET, "{}", json),
            Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
        }
        Ok(())
    }
}

/// Keeps every published event in memory.
#[derive(Default)]
pub struct MemoryEventPublisher {
    events: Mutex<Vec<OrderEvent>>,
    fail: AtomicBool,
}

impl MemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail with a transport error.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<OrderEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.event_type()).collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventPublisher {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, event: OrderEvent) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Transport("bus down".into()));
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}
