use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL for the ledger store. In-memory store when absent.
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub postgres_pool: PoolConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Broker REST API settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerConfig {
    pub base_url: String,
    pub data_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub request_timeout_ms: u64,
    /// Use the deterministic in-process broker instead of the REST API
    pub fake: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://paper-api.alpaca.markets".to_string(),
            data_url: "https://data.alpaca.markets".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            request_timeout_ms: 10_000,
            fake: true,
        }
    }
}

impl BrokerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// PostgreSQL pool sizing
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            min_connections: 1,
            acquire_timeout_ms: 5_000,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Order settlement settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SettlementConfig {
    pub currency: String,
    /// Safety buffer applied to ask-based estimates, in basis points
    pub quote_buffer_bps: u32,
    pub default_list_limit: u32,
    pub max_list_limit: u32,
    /// Shared secret expected in `X-Webhook-Secret` when set
    pub webhook_secret: Option<String>,
    /// Secret for `/internal/mock/*` endpoints
    pub internal_secret: String,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            quote_buffer_bps: 100,
            default_list_limit: 50,
            max_list_limit: 500,
            webhook_secret: None,
            internal_secret: "dev-secret".to_string(),
        }
    }
}

impl SettlementConfig {
    /// Multiplier applied to `qty × ask` when locking funds for a quantity buy.
    pub fn buffer_multiplier(&self) -> Decimal {
        Decimal::ONE + Decimal::new(self.quote_buffer_bps as i64, 4)
    }
}

/// Market data hub settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HubConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub client_buffer: usize,
    pub ping_interval_ms: u64,
    pub idle_timeout_ms: u64,
    pub max_symbols_per_client: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            batch_size: 100,
            batch_timeout_ms: 4_000,
            client_buffer: 64,
            ping_interval_ms: 30_000,
            idle_timeout_ms: 60_000,
            max_symbols_per_client: 200,
        }
    }
}

impl HubConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Message bus settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EventsConfig {
    /// HTTP endpoint of the bus. Events are only logged when absent.
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 3_000,
        }
    }
}

impl EventsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}
