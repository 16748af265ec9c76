//! Deterministic in-process broker
//!
//! Orders are acknowledged with sequential IDs and never fill on their own;
//! fills arrive only through the webhook. Quotes come from a settable table.
//! Failure switches and call logs let tests drive every error path.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{
    AssetInfo, BrokerError, BrokerGateway, CreateOrderRequest, MAX_QUOTE_BATCH, OrderAck, Quote,
};

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct FakeBroker {
    quotes: Mutex<HashMap<String, Quote>>,
    assets: Mutex<Vec<AssetInfo>>,
    /// client_order_id -> ack, for idempotent resubmission
    orders: Mutex<HashMap<String, OrderAck>>,
    submitted: Mutex<Vec<CreateOrderRequest>>,
    canceled: Mutex<Vec<String>>,
    quote_batches: Mutex<Vec<Vec<String>>>,
    next_id: AtomicU64,
    create_calls: AtomicUsize,
    fail_create: AtomicBool,
    fail_cancel: AtomicBool,
    fail_quotes: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker preloaded with a few liquid symbols for local runs.
    pub fn with_demo_market() -> Self {
        let broker = Self::new();
        for (symbol, name, bid, ask) in [
            ("AAPL", "Apple Inc.", Decimal::new(18990, 2), Decimal::new(19010, 2)),
            ("MSFT", "Microsoft Corporation", Decimal::new(41995, 2), Decimal::new(42005, 2)),
            ("TSLA", "Tesla, Inc.", Decimal::new(17780, 2), Decimal::new(17800, 2)),
            ("SPY", "SPDR S&P 500 ETF Trust", Decimal::new(52810, 2), Decimal::new(52812, 2)),
        ] {
            broker.set_quote(symbol, bid, ask);
            guard(&broker.assets).push(AssetInfo {
                symbol: symbol.to_string(),
                name: name.to_string(),
                tradable: true,
                fractionable: true,
            });
        }
        broker
    }

    pub fn set_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        guard(&self.quotes).insert(
            symbol.to_string(),
            Quote {
                symbol: symbol.to_string(),
                bid,
                ask,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn remove_quote(&self, symbol: &str) {
        guard(&self.quotes).remove(symbol);
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_cancel(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_quotes(&self, fail: bool) {
        self.fail_quotes.store(fail, Ordering::SeqCst);
    }

    /// Delay every call, to exercise caller timeouts.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *guard(&self.latency) = latency;
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<CreateOrderRequest> {
        guard(&self.submitted).clone()
    }

    pub fn canceled(&self) -> Vec<String> {
        guard(&self.canceled).clone()
    }

    pub fn quote_batches(&self) -> Vec<Vec<String>> {
        guard(&self.quote_batches).clone()
    }

    async fn delay(&self) {
        let latency = *guard(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn unavailable(what: &str) -> BrokerError {
        BrokerError::Unavailable(format!("fake broker: {} disabled", what))
    }
}

#[async_trait]
impl BrokerGateway for FakeBroker {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_order(&self, req: &CreateOrderRequest) -> Result<OrderAck, BrokerError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Self::unavailable("create_order"));
        }

        let mut orders = guard(&self.orders);
        if let Some(ack) = orders.get(&req.client_order_id) {
            return Ok(ack.clone());
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let ack = OrderAck {
            broker_order_id: format!("fake-{}", n),
            status: "accepted".to_string(),
        };
        orders.insert(req.client_order_id.clone(), ack.clone());
        guard(&self.submitted).push(req.clone());
        Ok(ack)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        self.delay().await;
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(Self::unavailable("cancel_order"));
        }
        let known = guard(&self.orders)
            .values()
            .any(|ack| ack.broker_order_id == broker_order_id);
        if !known {
            return Err(BrokerError::NotFound(broker_order_id.to_string()));
        }
        guard(&self.canceled).push(broker_order_id.to_string());
        Ok(())
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, BrokerError> {
        self.delay().await;
        if self.fail_quotes.load(Ordering::SeqCst) {
            return Err(Self::unavailable("quotes"));
        }
        guard(&self.quotes)
            .get(symbol)
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(symbol.to_string()))
    }

    async fn get_multi_quotes(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Quote>, BrokerError> {
        guard(&self.quote_batches).push(symbols.to_vec());
        self.delay().await;
        if self.fail_quotes.load(Ordering::SeqCst) {
            return Err(Self::unavailable("quotes"));
        }
        if symbols.len() > MAX_QUOTE_BATCH {
            return Err(BrokerError::Rejected {
                status: 400,
                message: format!("at most {} symbols per request", MAX_QUOTE_BATCH),
            });
        }
        let quotes = guard(&self.quotes);
        Ok(symbols
            .iter()
            .filter_map(|s| quotes.get(s).map(|q| (s.clone(), q.clone())))
            .collect())
    }

    async fn list_assets(&self) -> Result<Vec<AssetInfo>, BrokerError> {
        self.delay().await;
        Ok(guard(&self.assets).clone())
    }
}
