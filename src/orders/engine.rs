//! Settlement Engine
//!
//! Drives an order through its lifecycle against the ledger store, the broker
//! and the event bus. Each ledger mutation is a single conditional store
//! update; no lock is held while the broker is called.
//!
//! ```text
//! place:      hold funds/shares ─► pending ─► broker ─► new | failed
//! reconcile:  notification ─► transition() ─► CAS settle ─► events
//! cancel:     (broker cancel if new) ─► CAS settle ─► order.canceled
//! ```

use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::SettlementError;
use super::reconcile::{self, Skip, Transition};
use super::state::OrderStatus;
use super::types::{
    BrokerNotification, Order, OrderId, OrderSide, OrderSize, PlaceOrderRequest, UserId,
    normalize_symbol,
};
use crate::broker::{self, AssetInfo, BrokerGateway, CreateOrderRequest, Quote};
use crate::config::SettlementConfig;
use crate::events::{EventPublisher, OrderEvent};
use crate::ledger::{Holding, LedgerStore, SettleOutcome, Settlement, Wallet};

/// Attempts at a conditional settlement before giving up on a busy order
const MAX_CAS_ATTEMPTS: usize = 3;

/// Precision of share reservations estimated from a notional sell
const SHARE_DP: u32 = 9;

/// How a broker notification was handled
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Applied {
        order_id: OrderId,
        status: OrderStatus,
    },
    Ignored(Skip),
    /// No local order matches; acknowledged and dropped
    Unknown,
}

pub struct SettlementEngine {
    store: Arc<dyn LedgerStore>,
    broker: Arc<dyn BrokerGateway>,
    publisher: Arc<dyn EventPublisher>,
    config: SettlementConfig,
    broker_timeout: Duration,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        broker: Arc<dyn BrokerGateway>,
        publisher: Arc<dyn EventPublisher>,
        config: SettlementConfig,
        broker_timeout: Duration,
    ) -> Self {
        info!(
            store = store.name(),
            broker = broker.name(),
            publisher = publisher.name(),
            currency = %config.currency,
            "Settlement engine ready"
        );
        Self {
            store,
            broker,
            publisher,
            config,
            broker_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn currency(&self) -> &str {
        &self.config.currency
    }

    // ========================================================================
    // PlaceOrder
    // ========================================================================

    /// Hold funds or shares, record the order, submit it to the broker.
    ///
    /// The hold is committed before the broker sees the order. If submission
    /// fails or times out the hold is released and the order marked failed.
    pub async fn place_order(
        &self,
        user_id: UserId,
        req: &PlaceOrderRequest,
    ) -> Result<Order, SettlementError> {
        let valid = req.validate()?;

        if !self.store.is_account_active(user_id).await? {
            return Err(SettlementError::AccountInactive);
        }

        let (locked_amount, reserved_qty) = match (valid.side, valid.size) {
            (OrderSide::Buy, OrderSize::Notional(amount)) => (amount, Decimal::ZERO),
            (OrderSide::Buy, OrderSize::Quantity(qty)) => {
                let quote = self.quote_for(&valid.symbol).await?;
                if quote.ask <= Decimal::ZERO {
                    return Err(SettlementError::BrokerUnavailable(format!(
                        "no ask price for {}",
                        valid.symbol
                    )));
                }
                let hold = qty
                    .checked_mul(quote.ask)
                    .and_then(|v| v.checked_mul(self.config.buffer_multiplier()))
                    .ok_or_else(|| SettlementError::Validation("order value too large".into()))?
                    .round_dp_with_strategy(2, RoundingStrategy::AwayFromZero);
                (hold, Decimal::ZERO)
            }
            (OrderSide::Sell, OrderSize::Quantity(qty)) => (Decimal::ZERO, qty),
            (OrderSide::Sell, OrderSize::Notional(amount)) => {
                let quote = self.quote_for(&valid.symbol).await?;
                if quote.bid <= Decimal::ZERO {
                    return Err(SettlementError::BrokerUnavailable(format!(
                        "no bid price for {}",
                        valid.symbol
                    )));
                }
                let shares = amount
                    .checked_div(quote.bid)
                    .ok_or_else(|| SettlementError::Validation("order size too large".into()))?
                    .round_dp_with_strategy(SHARE_DP, RoundingStrategy::AwayFromZero);
                (Decimal::ZERO, shares)
            }
        };

        let order = Order::pending(
            user_id,
            valid.symbol.clone(),
            valid.side,
            valid.size,
            self.config.currency.clone(),
            locked_amount,
            reserved_qty,
        );
        self.store.open_order(&order).await?;
        debug!(
            order_id = %order.id,
            user_id,
            symbol = %order.symbol,
            side = %order.side,
            %locked_amount,
            %reserved_qty,
            "Order opened"
        );

        let submit = CreateOrderRequest {
            symbol: order.symbol.clone(),
            side: order.side,
            size: valid.size,
            client_order_id: order.client_order_id(),
        };
        let ack = match broker::with_timeout(self.broker_timeout, self.broker.create_order(&submit))
            .await
        {
            Ok(ack) => ack,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Broker submission failed");
                let settlement = reconcile::submission_failed(&order, e.to_string());
                match self.store.apply_settlement(&settlement).await {
                    Ok(SettleOutcome::Applied(_)) => {}
                    Ok(SettleOutcome::Conflict) => {
                        debug!(order_id = %order.id, "Order left pending before failure was recorded")
                    }
                    Err(store_err) => {
                        error!(order_id = %order.id, error = %store_err, "Failed to release hold of failed order")
                    }
                }
                return Err(e.into());
            }
        };

        let attached = self
            .store
            .attach_broker_order(order.id, &ack.broker_order_id)
            .await
            .inspect_err(|e| {
                error!(
                    order_id = %order.id,
                    broker_order_id = %ack.broker_order_id,
                    error = %e,
                    "Broker accepted order but it could not be recorded"
                )
            })?;

        if attached {
            info!(
                order_id = %order.id,
                broker_order_id = %ack.broker_order_id,
                symbol = %order.symbol,
                side = %order.side,
                "Order submitted"
            );
            let current = self.reload(order.id).await?;
            self.publish(OrderEvent::created(&current, &ack.broker_order_id))
                .await;
            return Ok(current);
        }

        let current = self.reload(order.id).await?;
        if current.broker_order_id.as_deref() == Some(ack.broker_order_id.as_str()) {
            // A notification carrying our client order ID attached it first
            self.publish(OrderEvent::created(&current, &ack.broker_order_id))
                .await;
            return Ok(current);
        }

        // Canceled locally while the submission was in flight
        warn!(
            order_id = %order.id,
            broker_order_id = %ack.broker_order_id,
            "Late broker ack for an order no longer pending, canceling at broker"
        );
        if let Err(e) = broker::with_timeout(
            self.broker_timeout,
            self.broker.cancel_order(&ack.broker_order_id),
        )
        .await
        {
            error!(broker_order_id = %ack.broker_order_id, error = %e, "Best-effort broker cancel failed");
        }
        self.reload(order.id).await
    }

    // ========================================================================
    // ReconcileFill
    // ========================================================================

    /// Apply one broker notification. Safe under redelivery and concurrency:
    /// every step is conditional on the order state it was computed from.
    pub async fn reconcile_fill(
        &self,
        notification: &BrokerNotification,
    ) -> Result<ReconcileOutcome, SettlementError> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(order) = self.find_notified_order(notification).await? else {
                warn!(
                    broker_order_id = %notification.order_id,
                    client_order_id = ?notification.client_order_id,
                    event = ?notification.event,
                    "Notification for unknown order dropped"
                );
                return Ok(ReconcileOutcome::Unknown);
            };

            let settlement = match reconcile::transition(&order, notification) {
                Transition::Apply(settlement) => settlement,
                Transition::Ignore(skip) => {
                    if order.status == OrderStatus::Failed
                        && notification.filled_qty > Decimal::ZERO
                    {
                        error!(
                            order_id = %order.id,
                            broker_order_id = %notification.order_id,
                            filled_qty = %notification.filled_qty,
                            "Broker reports fills on an order recorded as failed"
                        );
                    } else {
                        debug!(order_id = %order.id, reason = %skip, "Notification ignored");
                    }
                    return Ok(ReconcileOutcome::Ignored(skip));
                }
            };

            match self.store.apply_settlement(&settlement).await? {
                SettleOutcome::Applied(receipt) => {
                    if !receipt.cash_shortfall.is_zero() {
                        error!(
                            order_id = %order.id,
                            user_id = order.user_id,
                            shortfall = %receipt.cash_shortfall,
                            "Fill cost exceeded held and available funds"
                        );
                    }
                    if !receipt.share_shortfall.is_zero() {
                        error!(
                            order_id = %order.id,
                            user_id = order.user_id,
                            shortfall = %receipt.share_shortfall,
                            "Sell fill exceeded shares held"
                        );
                    }
                    info!(
                        order_id = %order.id,
                        from = %order.status,
                        to = %settlement.new_status,
                        filled_qty = %settlement.filled_qty,
                        "Order reconciled"
                    );

                    let updated = self.reload(order.id).await?;
                    if settlement.filled_qty > order.filled_qty {
                        self.publish(OrderEvent::filled(&updated)).await;
                    }
                    if settlement.new_status == OrderStatus::Canceled {
                        let released = reconcile::released_amount(&settlement.delta);
                        self.publish(OrderEvent::canceled(&updated, released)).await;
                    }
                    return Ok(ReconcileOutcome::Applied {
                        order_id: order.id,
                        status: settlement.new_status,
                    });
                }
                SettleOutcome::Conflict => {
                    debug!(order_id = %order.id, attempt, "Order changed concurrently, retrying");
                }
            }
        }

        Err(SettlementError::Internal(format!(
            "order for broker id {} kept changing during reconciliation",
            notification.order_id
        )))
    }

    /// Look up by broker ID, falling back to our client order ID for
    /// notifications that race the submission ack.
    async fn find_notified_order(
        &self,
        notification: &BrokerNotification,
    ) -> Result<Option<Order>, SettlementError> {
        if let Some(order) = self
            .store
            .order_by_broker_id(&notification.order_id)
            .await?
        {
            return Ok(Some(order));
        }

        let Some(order_id) = notification
            .client_order_id
            .as_deref()
            .and_then(|id| id.parse::<OrderId>().ok())
        else {
            return Ok(None);
        };
        let Some(order) = self.store.order(order_id).await? else {
            return Ok(None);
        };

        if order.status == OrderStatus::Pending && order.broker_order_id.is_none() {
            // Adopt the broker ID now; the submission path sees the attach lost
            if self
                .store
                .attach_broker_order(order.id, &notification.order_id)
                .await?
            {
                debug!(order_id = %order.id, broker_order_id = %notification.order_id, "Broker id attached from notification");
                return Ok(Some(self.reload(order.id).await?));
            }
        }
        Ok(Some(order))
    }

    // ========================================================================
    // CancelOrder
    // ========================================================================

    /// Cancel an order of `user_id`. Orders already at the broker are
    /// canceled there first; if the broker refuses nothing changes locally.
    ///
    /// Once the broker has accepted the cancel, a fill that lands locally
    /// first does not fail the request: the current order is returned and
    /// the broker's `canceled` notification settles the remainder.
    pub async fn cancel_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Order, SettlementError> {
        let mut broker_canceled = false;
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let order = self.owned_order(user_id, order_id).await?;
            if order.status == OrderStatus::Canceled && attempt > 1 {
                // A concurrent notification or cancel got there first
                return Ok(order);
            }
            let Some(settlement) = reconcile::local_cancel(&order) else {
                if broker_canceled {
                    warn!(
                        order_id = %order.id,
                        user_id,
                        status = %order.status,
                        "Order changed after broker cancel, awaiting broker notification"
                    );
                    return Ok(order);
                }
                return Err(SettlementError::OrderNotCancelable(
                    order.status.to_string(),
                ));
            };

            if let Some(broker_order_id) = order.broker_order_id.as_ref().filter(|_| !broker_canceled) {
                broker::with_timeout(self.broker_timeout, self.broker.cancel_order(broker_order_id))
                    .await
                    .inspect_err(|e| {
                        warn!(order_id = %order.id, %broker_order_id, error = %e, "Broker cancel failed")
                    })?;
                broker_canceled = true;
            }

            match self.store.apply_settlement(&settlement).await? {
                SettleOutcome::Applied(_) => {
                    let released = reconcile::released_amount(&settlement.delta);
                    info!(order_id = %order.id, user_id, %released, "Order canceled");
                    let updated = self.reload(order.id).await?;
                    self.publish(OrderEvent::canceled(&updated, released)).await;
                    return Ok(updated);
                }
                SettleOutcome::Conflict => {
                    debug!(order_id = %order.id, attempt, "Order changed during cancel, retrying");
                }
            }
        }

        Err(SettlementError::Internal(format!(
            "order {} kept changing during cancel",
            order_id
        )))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Order, SettlementError> {
        self.owned_order(user_id, order_id).await
    }

    /// Newest first. `limit` defaults and clamps per configuration.
    pub async fn list_orders(
        &self,
        user_id: UserId,
        status: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Order>, SettlementError> {
        let status = status
            .map(|s| {
                s.parse::<OrderStatus>()
                    .map_err(|_| SettlementError::Validation(format!("unknown status: {}", s)))
            })
            .transpose()?;
        let limit = limit
            .unwrap_or(self.config.default_list_limit)
            .clamp(1, self.config.max_list_limit);
        Ok(self.store.list_orders(user_id, status, limit).await?)
    }

    /// Wallet in the settlement currency; zero if never funded.
    pub async fn wallet(&self, user_id: UserId) -> Result<Wallet, SettlementError> {
        Ok(self
            .store
            .wallet(user_id, &self.config.currency)
            .await?
            .unwrap_or_else(|| Wallet::new(user_id, self.config.currency.as_str())))
    }

    pub async fn holdings(&self, user_id: UserId) -> Result<Vec<Holding>, SettlementError> {
        Ok(self.store.holdings(user_id).await?)
    }

    pub async fn quote(&self, symbol: &str) -> Result<Quote, SettlementError> {
        let symbol = normalize_symbol(symbol)
            .ok_or_else(|| SettlementError::Validation(format!("invalid symbol: {}", symbol)))?;
        self.quote_for(&symbol).await
    }

    pub async fn assets(&self) -> Result<Vec<AssetInfo>, SettlementError> {
        Ok(broker::with_timeout(self.broker_timeout, self.broker.list_assets()).await?)
    }

    /// Credit the settlement-currency wallet (funding simulation).
    pub async fn deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<Wallet, SettlementError> {
        if amount <= Decimal::ZERO {
            return Err(SettlementError::Validation(
                "amount must be positive".into(),
            ));
        }
        let wallet = self
            .store
            .deposit(user_id, &self.config.currency, amount)
            .await?;
        info!(user_id, %amount, balance = %wallet.balance(), "Deposit credited");
        Ok(wallet)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn owned_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Order, SettlementError> {
        let order = self.reload(order_id).await?;
        if order.user_id != user_id {
            return Err(SettlementError::Forbidden);
        }
        Ok(order)
    }

    async fn reload(&self, order_id: OrderId) -> Result<Order, SettlementError> {
        self.store
            .order(order_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(order_id.to_string()))
    }

    async fn quote_for(&self, symbol: &str) -> Result<Quote, SettlementError> {
        Ok(broker::with_timeout(self.broker_timeout, self.broker.get_quote(symbol)).await?)
    }

    /// Events never undo a committed settlement.
    async fn publish(&self, event: OrderEvent) {
        let event_type = event.event_type();
        let order_id = event.order_id().to_string();
        if let Err(e) = self.publisher.publish(event).await {
            warn!(%order_id, event_type, error = %e, "Event publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::FakeBroker;
    use crate::events::MemoryEventPublisher;
    use crate::ledger::MemoryLedgerStore;
    use crate::orders::NotificationKind;
    use rust_decimal_macros::dec;

    struct Harness {
        store: Arc<MemoryLedgerStore>,
        broker: Arc<FakeBroker>,
        events: Arc<MemoryEventPublisher>,
        engine: SettlementEngine,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryLedgerStore::new());
        let broker = Arc::new(FakeBroker::new());
        broker.set_quote("AAPL", dec!(165), dec!(166));
        let events = Arc::new(MemoryEventPublisher::new());
        let engine = SettlementEngine::new(
            store.clone(),
            broker.clone(),
            events.clone(),
            SettlementConfig::default(),
            Duration::from_millis(200),
        );
        Harness {
            store,
            broker,
            events,
            engine,
        }
    }

    fn buy_amount(amount: Decimal) -> PlaceOrderRequest {
        PlaceOrderRequest {
            symbol: "aapl".into(),
            side: OrderSide::Buy,
            amount: Some(amount),
            qty: None,
        }
    }

    fn sell_qty(qty: Decimal) -> PlaceOrderRequest {
        PlaceOrderRequest {
            symbol: "AAPL".into(),
            side: OrderSide::Sell,
            amount: None,
            qty: Some(qty),
        }
    }

    fn fill(order: &Order, event: NotificationKind, qty: Decimal, price: Decimal) -> BrokerNotification {
        BrokerNotification {
            event,
            order_id: order.broker_order_id.clone().unwrap_or_default(),
            client_order_id: None,
            filled_qty: qty,
            filled_avg_price: Some(price),
        }
    }

    #[tokio::test]
    async fn test_buy_by_amount_locks_then_settles() {
        let h = harness();
        h.engine.deposit(1, dec!(1000)).await.unwrap();

        let order = h.engine.place_order(1, &buy_amount(dec!(500))).await.unwrap();
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.symbol, "AAPL");
        let wallet = h.engine.wallet(1).await.unwrap();
        assert_eq!(wallet.locked(), dec!(500));
        assert_eq!(wallet.available(), dec!(500));

        let outcome = h
            .engine
            .reconcile_fill(&fill(&order, NotificationKind::Fill, dec!(3), dec!(166)))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                order_id: order.id,
                status: OrderStatus::Filled
            }
        );

        let wallet = h.engine.wallet(1).await.unwrap();
        assert_eq!(wallet.balance(), dec!(502));
        assert_eq!(wallet.locked(), Decimal::ZERO);
        let holdings = h.engine.holdings(1).await.unwrap();
        assert_eq!(holdings[0].quantity(), dec!(3));
        assert_eq!(holdings[0].average_cost(), dec!(166));
        assert_eq!(h.events.event_types(), vec!["order.created", "order.filled"]);
    }

    #[tokio::test]
    async fn test_buy_by_qty_locks_buffered_ask() {
        let h = harness();
        h.engine.deposit(1, dec!(1000)).await.unwrap();
        let req = PlaceOrderRequest {
            symbol: "AAPL".into(),
            side: OrderSide::Buy,
            amount: None,
            qty: Some(dec!(2)),
        };
        let order = h.engine.place_order(1, &req).await.unwrap();
        // 2 × 166 × 1.01
        assert_eq!(order.locked_amount, dec!(335.32));
    }

    #[tokio::test]
    async fn test_insufficient_funds_never_reaches_broker() {
        let h = harness();
        h.engine.deposit(1, dec!(100)).await.unwrap();
        let err = h.engine.place_order(1, &buy_amount(dec!(500))).await.unwrap_err();
        assert!(matches!(err, SettlementError::InsufficientFunds { .. }));
        assert_eq!(h.broker.create_calls(), 0);
        assert_eq!(h.engine.wallet(1).await.unwrap().locked(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_inactive_account_rejected() {
        let h = harness();
        h.engine.deposit(1, dec!(1000)).await.unwrap();
        h.store.set_account_active(1, false).await.unwrap();
        let err = h.engine.place_order(1, &buy_amount(dec!(10))).await.unwrap_err();
        assert!(matches!(err, SettlementError::AccountInactive));
    }

    #[tokio::test]
    async fn test_broker_failure_releases_hold_and_marks_failed() {
        let h = harness();
        h.engine.deposit(1, dec!(1000)).await.unwrap();
        h.broker.set_fail_create(true);

        let err = h.engine.place_order(1, &buy_amount(dec!(500))).await.unwrap_err();
        assert!(matches!(err, SettlementError::BrokerUnavailable(_)));

        let wallet = h.engine.wallet(1).await.unwrap();
        assert_eq!(wallet.locked(), Decimal::ZERO);
        assert_eq!(wallet.balance(), dec!(1000));
        let orders = h.engine.list_orders(1, None, None).await.unwrap();
        assert_eq!(orders[0].status, OrderStatus::Failed);
        assert!(orders[0].failure_reason.is_some());
        assert!(h.events.events().is_empty());
    }

    #[tokio::test]
    async fn test_broker_timeout_counts_as_failure() {
        let h = harness();
        h.engine.deposit(1, dec!(1000)).await.unwrap();
        h.broker.set_latency(Some(Duration::from_secs(2)));

        let err = h.engine.place_order(1, &buy_amount(dec!(500))).await.unwrap_err();
        assert!(matches!(err, SettlementError::BrokerUnavailable(_)));
        assert_eq!(h.engine.wallet(1).await.unwrap().locked(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_duplicate_fill_applies_once() {
        let h = harness();
        h.engine.deposit(1, dec!(1000)).await.unwrap();
        let order = h.engine.place_order(1, &buy_amount(dec!(500))).await.unwrap();
        let n = fill(&order, NotificationKind::Fill, dec!(3), dec!(166));

        h.engine.reconcile_fill(&n).await.unwrap();
        let again = h.engine.reconcile_fill(&n).await.unwrap();
        assert_eq!(
            again,
            ReconcileOutcome::Ignored(Skip::Terminal(OrderStatus::Filled))
        );
        assert_eq!(h.engine.wallet(1).await.unwrap().balance(), dec!(502));
        assert_eq!(h.engine.holdings(1).await.unwrap()[0].quantity(), dec!(3));
    }

    #[tokio::test]
    async fn test_overflowing_fill_is_ignored_without_ledger_change() {
        let h = harness();
        h.engine.deposit(1, dec!(1000)).await.unwrap();
        let order = h.engine.place_order(1, &buy_amount(dec!(500))).await.unwrap();

        let outcome = h
            .engine
            .reconcile_fill(&fill(&order, NotificationKind::Fill, Decimal::MAX, dec!(2)))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Ignored(Skip::Invalid("fill value overflow"))
        );
        let wallet = h.engine.wallet(1).await.unwrap();
        assert_eq!(wallet.balance(), dec!(1000));
        assert_eq!(wallet.locked(), dec!(500));
        assert_eq!(
            h.engine.get_order(1, order.id).await.unwrap().status,
            OrderStatus::New
        );
    }

    #[tokio::test]
    async fn test_oversized_buy_rejected_before_broker() {
        let h = harness();
        h.engine.deposit(1, dec!(1000)).await.unwrap();
        let mut req = buy_amount(dec!(1));
        req.amount = None;
        req.qty = Some(Decimal::MAX / dec!(10));
        let err = h.engine.place_order(1, &req).await.unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));

        // In-bounds qty against an absurd ask still cannot overflow the hold
        h.broker.set_quote("AAPL", dec!(1), Decimal::MAX / dec!(2));
        req.qty = Some(dec!(3));
        let err = h.engine.place_order(1, &req).await.unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));
        assert_eq!(h.broker.create_calls(), 0);
        assert_eq!(h.engine.wallet(1).await.unwrap().locked(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_order_notification_acknowledged() {
        let h = harness();
        let n = BrokerNotification {
            event: NotificationKind::Fill,
            order_id: "nope".into(),
            client_order_id: None,
            filled_qty: dec!(1),
            filled_avg_price: Some(dec!(1)),
        };
        assert_eq!(
            h.engine.reconcile_fill(&n).await.unwrap(),
            ReconcileOutcome::Unknown
        );
    }

    #[tokio::test]
    async fn test_sell_reserves_shares_against_open_sells() {
        let h = harness();
        h.store.seed_holding(1, "AAPL", dec!(5), dec!(100)).unwrap();

        let first = h.engine.place_order(1, &sell_qty(dec!(3))).await.unwrap();
        assert_eq!(first.reserved_qty, dec!(3));
        let err = h.engine.place_order(1, &sell_qty(dec!(3))).await.unwrap_err();
        assert!(matches!(err, SettlementError::InsufficientShares { .. }));

        h.engine
            .reconcile_fill(&fill(&first, NotificationKind::Fill, dec!(3), dec!(150)))
            .await
            .unwrap();
        assert_eq!(h.engine.holdings(1).await.unwrap()[0].quantity(), dec!(2));
        assert_eq!(h.engine.wallet(1).await.unwrap().balance(), dec!(450));
    }

    #[tokio::test]
    async fn test_cancel_new_order_cancels_at_broker_and_releases() {
        let h = harness();
        h.engine.deposit(1, dec!(1000)).await.unwrap();
        let order = h.engine.place_order(1, &buy_amount(dec!(500))).await.unwrap();

        let canceled = h.engine.cancel_order(1, order.id).await.unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert_eq!(h.broker.canceled(), vec![order.broker_order_id.clone().unwrap()]);
        assert_eq!(h.engine.wallet(1).await.unwrap().available(), dec!(1000));
        assert_eq!(
            h.events.event_types(),
            vec!["order.created", "order.canceled"]
        );

        let err = h.engine.cancel_order(1, order.id).await.unwrap_err();
        assert!(matches!(err, SettlementError::OrderNotCancelable(_)));
    }

    #[tokio::test]
    async fn test_fill_landing_after_broker_cancel_returns_current_order() {
        let h = harness();
        h.engine.deposit(1, dec!(1000)).await.unwrap();
        let order = h.engine.place_order(1, &buy_amount(dec!(500))).await.unwrap();
        h.broker.set_latency(Some(Duration::from_millis(100)));

        let partial = fill(&order, NotificationKind::PartialFill, dec!(1), dec!(100));
        let (canceled, _) = tokio::join!(h.engine.cancel_order(1, order.id), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.engine.reconcile_fill(&partial).await.unwrap()
        });

        let current = canceled.unwrap();
        assert_eq!(current.status, OrderStatus::PartiallyFilled);
        assert_eq!(h.broker.canceled().len(), 1);
        assert_eq!(h.engine.wallet(1).await.unwrap().locked(), dec!(400));

        let mut done = fill(&order, NotificationKind::Canceled, dec!(1), dec!(100));
        done.filled_avg_price = None;
        h.engine.reconcile_fill(&done).await.unwrap();
        let wallet = h.engine.wallet(1).await.unwrap();
        assert_eq!(wallet.locked(), Decimal::ZERO);
        assert_eq!(wallet.balance(), dec!(900));
    }

    #[tokio::test]
    async fn test_cancel_broker_failure_keeps_order() {
        let h = harness();
        h.engine.deposit(1, dec!(1000)).await.unwrap();
        let order = h.engine.place_order(1, &buy_amount(dec!(500))).await.unwrap();
        h.broker.set_fail_cancel(true);

        let err = h.engine.cancel_order(1, order.id).await.unwrap_err();
        assert!(matches!(err, SettlementError::BrokerUnavailable(_)));
        let current = h.engine.get_order(1, order.id).await.unwrap();
        assert_eq!(current.status, OrderStatus::New);
        assert_eq!(h.engine.wallet(1).await.unwrap().locked(), dec!(500));
    }

    #[tokio::test]
    async fn test_cancel_other_users_order_forbidden() {
        let h = harness();
        h.engine.deposit(1, dec!(1000)).await.unwrap();
        let order = h.engine.place_order(1, &buy_amount(dec!(500))).await.unwrap();
        assert!(matches!(
            h.engine.cancel_order(2, order.id).await,
            Err(SettlementError::Forbidden)
        ));
        assert!(matches!(
            h.engine.cancel_order(1, OrderId::new()).await,
            Err(SettlementError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_orders_validates_status_and_clamps_limit() {
        let h = harness();
        h.engine.deposit(1, dec!(1000)).await.unwrap();
        for _ in 0..3 {
            h.engine.place_order(1, &buy_amount(dec!(10))).await.unwrap();
        }
        assert_eq!(h.engine.list_orders(1, None, Some(2)).await.unwrap().len(), 2);
        assert_eq!(h.engine.list_orders(1, Some("new"), Some(0)).await.unwrap().len(), 1);
        assert!(h.engine.list_orders(1, Some("filled"), None).await.unwrap().is_empty());
        assert!(matches!(
            h.engine.list_orders(1, Some("bogus"), None).await,
            Err(SettlementError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_settlement() {
        let h = harness();
        h.engine.deposit(1, dec!(1000)).await.unwrap();
        h.events.set_fail(true);
        let order = h.engine.place_order(1, &buy_amount(dec!(500))).await.unwrap();
        assert_eq!(order.status, OrderStatus::New);
    }
}
