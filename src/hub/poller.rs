//! Quote poll loop
//!
//! Every tick: snapshot the distinct subscribed symbols, split them into
//! batches the broker accepts, fetch the batches concurrently under a
//! per-batch timeout and hand the quotes to the hub. A failed batch is
//! skipped until the next tick.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::service::HubHandle;
use crate::broker::{BrokerGateway, MAX_QUOTE_BATCH};
use crate::config::HubConfig;

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub symbols: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub quotes: usize,
}

pub struct QuotePoller {
    broker: Arc<dyn BrokerGateway>,
    hub: HubHandle,
    interval: Duration,
    batch_size: usize,
    batch_timeout: Duration,
}

impl QuotePoller {
    pub fn new(broker: Arc<dyn BrokerGateway>, hub: HubHandle, config: &HubConfig) -> Self {
        Self {
            broker,
            hub,
            interval: config.poll_interval(),
            batch_size: config.batch_size.clamp(1, MAX_QUOTE_BATCH),
            batch_timeout: config.batch_timeout(),
        }
    }

    /// Run one cycle. `None` once the hub has stopped.
    pub async fn poll_once(&self) -> Option<PollReport> {
        let symbols = self.hub.symbols().await?;
        let mut report = PollReport {
            symbols: symbols.len(),
            ..PollReport::default()
        };
        if symbols.is_empty() {
            return Some(report);
        }

        let batches: Vec<&[String]> = symbols.chunks(self.batch_size).collect();
        report.batches = batches.len();

        let results = join_all(batches.iter().map(|batch| {
            tokio::time::timeout(self.batch_timeout, self.broker.get_multi_quotes(batch))
        }))
        .await;

        let mut quotes = Vec::with_capacity(symbols.len());
        for (batch, result) in batches.iter().zip(results) {
            match result {
                Ok(Ok(found)) => quotes.extend(found.into_values()),
                Ok(Err(e)) => {
                    report.failed_batches += 1;
                    warn!(size = batch.len(), first = %batch[0], error = %e, "Quote batch failed");
                }
                Err(_) => {
                    report.failed_batches += 1;
                    warn!(
                        size = batch.len(),
                        first = %batch[0],
                        timeout_ms = self.batch_timeout.as_millis() as u64,
                        "Quote batch timed out"
                    );
                }
            }
        }

        report.quotes = quotes.len();
        if !self.hub.publish(quotes) {
            return None;
        }
        debug!(
            symbols = report.symbols,
            batches = report.batches,
            failed = report.failed_batches,
            quotes = report.quotes,
            "Poll cycle complete"
        );
        Some(report)
    }

    /// Poll on a fixed interval until the hub stops.
    pub async fn run(self) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            batch_size = self.batch_size,
            broker = self.broker.name(),
            "Quote poller started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.poll_once().await.is_none() {
                break;
            }
        }
        info!("Quote poller stopped");
    }
}
