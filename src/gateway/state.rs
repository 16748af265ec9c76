use std::sync::Arc;

use crate::config::{HubConfig, SettlementConfig};
use crate::hub::HubHandle;
use crate::orders::SettlementEngine;

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SettlementEngine>,
    /// Market data hub control loop
    pub hub: HubHandle,
    pub hub_config: HubConfig,
    /// Webhook and internal-endpoint secrets
    pub settlement: SettlementConfig,
}

impl AppState {
    pub fn new(
        engine: Arc<SettlementEngine>,
        hub: HubHandle,
        hub_config: HubConfig,
        settlement: SettlementConfig,
    ) -> Self {
        Self {
            engine,
            hub,
            hub_config,
            settlement,
        }
    }
}
