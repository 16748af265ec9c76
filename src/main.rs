//! Brokerage Core server
//!
//! ```text
//! ┌─────────┐   ┌────────────┐   ┌──────────┐   ┌────────┐
//! │ Gateway │──▶│ Settlement │──▶│  Ledger  │   │ Broker │
//! │ (axum)  │   │   Engine   │──▶│  Store   │   │Gateway │
//! └────┬────┘   └─────┬──────┘   └──────────┘   └───▲────┘
//!      │ /ws          └──────────▶ Event bus        │
//!      ▼                                            │
//! ┌─────────┐   quotes   ┌─────────────┐  batches   │
//! │   Hub   │◀───────────│ QuotePoller │────────────┘
//! └─────────┘            └─────────────┘
//! ```
//!
//! Usage: `brokerage_core [--env dev|prod] [--port N]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use brokerage_core::broker::{BrokerGateway, FakeBroker, HttpBroker};
use brokerage_core::config::AppConfig;
use brokerage_core::db::Database;
use brokerage_core::events::{EventPublisher, HttpEventPublisher, LogEventPublisher};
use brokerage_core::gateway::{self, state::AppState};
use brokerage_core::hub::{QuotePoller, spawn_hub};
use brokerage_core::ledger::{LedgerStore, MemoryLedgerStore, PgLedgerStore};
use brokerage_core::logging::init_logging;
use brokerage_core::orders::SettlementEngine;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url, &config.postgres_pool)
                .await
                .context("Failed to connect to PostgreSQL")?;
            let store = PgLedgerStore::new(db.pool().clone());
            store.init_schema().await.context("Failed to init schema")?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("No postgres_url configured, using in-memory ledger (data is not persisted)");
            Ok(Arc::new(MemoryLedgerStore::new()))
        }
    }
}

fn build_broker(config: &AppConfig) -> anyhow::Result<Arc<dyn BrokerGateway>> {
    if config.broker.fake {
        tracing::warn!("Using in-process fake broker with demo quotes");
        return Ok(Arc::new(FakeBroker::with_demo_market()));
    }
    Ok(Arc::new(
        HttpBroker::new(&config.broker).context("Failed to build broker client")?,
    ))
}

fn build_publisher(config: &AppConfig) -> anyhow::Result<Arc<dyn EventPublisher>> {
    match &config.events.endpoint {
        Some(endpoint) => Ok(Arc::new(
            HttpEventPublisher::new(endpoint.as_str(), config.events.timeout())
                .context("Failed to build event publisher")?,
        )),
        None => Ok(Arc::new(LogEventPublisher)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut app_config = AppConfig::load(&env)?;
    if let Some(port) = get_port_override() {
        app_config.gateway.port = port;
    }
    let _log_guard = init_logging(&app_config);

    tracing::info!(
        env = %env,
        version = env!("GIT_HASH"),
        port = app_config.gateway.port,
        "Starting Brokerage Core"
    );

    let store = build_store(&app_config).await?;
    let broker = build_broker(&app_config)?;
    let publisher = build_publisher(&app_config)?;

    let engine = Arc::new(SettlementEngine::new(
        store,
        broker.clone(),
        publisher,
        app_config.settlement.clone(),
        app_config.broker.request_timeout(),
    ));

    let (hub, hub_task) = spawn_hub(&app_config.hub);
    let poller = QuotePoller::new(broker, hub.clone(), &app_config.hub);
    let poller_task = tokio::spawn(poller.run());

    let state = Arc::new(AppState::new(
        engine,
        hub,
        app_config.hub.clone(),
        app_config.settlement.clone(),
    ));

    let served = gateway::run_server(&app_config.gateway, state, shutdown_signal()).await;

    // Router (and its hub handle) is gone; the poller is the last handle
    poller_task.abort();
    let _ = poller_task.await;
    // Open WebSocket tasks may still hold hub handles
    if tokio::time::timeout(Duration::from_secs(5), hub_task).await.is_err() {
        tracing::warn!("Market data hub did not stop within 5s");
    }

    served
}
