//! End-to-end settlement flows against the in-memory store and fake broker.

use std::sync::Arc;
use std::time::Duration;

use brokerage_core::broker::FakeBroker;
use brokerage_core::config::SettlementConfig;
use brokerage_core::events::MemoryEventPublisher;
use brokerage_core::ledger::{LedgerStore, MemoryLedgerStore};
use brokerage_core::orders::{
    BrokerNotification, NotificationKind, Order, OrderSide, OrderStatus, PlaceOrderRequest,
    ReconcileOutcome, SettlementEngine, SettlementError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

struct Desk {
    store: Arc<MemoryLedgerStore>,
    broker: Arc<FakeBroker>,
    events: Arc<MemoryEventPublisher>,
    engine: Arc<SettlementEngine>,
}

fn desk(broker_timeout: Duration) -> Desk {
    let store = Arc::new(MemoryLedgerStore::new());
    let broker = Arc::new(FakeBroker::new());
    broker.set_quote("AAPL", dec!(165), dec!(166));
    let events = Arc::new(MemoryEventPublisher::new());
    let engine = Arc::new(SettlementEngine::new(
        store.clone(),
        broker.clone(),
        events.clone(),
        SettlementConfig::default(),
        broker_timeout,
    ));
    Desk {
        store,
        broker,
        events,
        engine,
    }
}

fn buy(amount: Decimal) -> PlaceOrderRequest {
    PlaceOrderRequest {
        symbol: "AAPL".into(),
        side: OrderSide::Buy,
        amount: Some(amount),
        qty: None,
    }
}

fn sell(qty: Decimal) -> PlaceOrderRequest {
    PlaceOrderRequest {
        symbol: "AAPL".into(),
        side: OrderSide::Sell,
        amount: None,
        qty: Some(qty),
    }
}

fn notify(order: &Order, event: NotificationKind, qty: Decimal, price: Decimal) -> BrokerNotification {
    BrokerNotification {
        event,
        order_id: order.broker_order_id.clone().unwrap_or_default(),
        client_order_id: Some(order.client_order_id()),
        filled_qty: qty,
        filled_avg_price: Some(price),
    }
}

#[tokio::test]
async fn buy_by_amount_fills_below_hold_and_refunds_remainder() {
    let d = desk(Duration::from_millis(500));
    d.engine.deposit(1, dec!(1000)).await.unwrap();

    let order = d.engine.place_order(1, &buy(dec!(500))).await.unwrap();
    let wallet = d.engine.wallet(1).await.unwrap();
    assert_eq!(wallet.balance(), dec!(1000));
    assert_eq!(wallet.locked(), dec!(500));

    d.engine
        .reconcile_fill(&notify(&order, NotificationKind::Fill, dec!(3), dec!(166.00)))
        .await
        .unwrap();

    let wallet = d.engine.wallet(1).await.unwrap();
    assert_eq!(wallet.balance(), dec!(502));
    assert_eq!(wallet.locked(), Decimal::ZERO);
    let holding = d.store.holding(1, "AAPL").await.unwrap().unwrap();
    assert_eq!(holding.quantity(), dec!(3));
    assert_eq!(holding.average_cost(), dec!(166));

    let filled = d.engine.get_order(1, order.id).await.unwrap();
    assert_eq!(filled.status, OrderStatus::Filled);
    assert_eq!(filled.locked_amount, Decimal::ZERO);
    assert_eq!(d.events.event_types(), vec!["order.created", "order.filled"]);
}

#[tokio::test]
async fn sell_beyond_holding_is_rejected_without_side_effects() {
    let d = desk(Duration::from_millis(500));
    d.store.seed_holding(1, "AAPL", dec!(2), dec!(150)).unwrap();

    let err = d.engine.place_order(1, &sell(dec!(5))).await.unwrap_err();
    assert!(matches!(err, SettlementError::InsufficientShares { .. }), "{:?}", err);

    assert!(d.engine.list_orders(1, None, None).await.unwrap().is_empty());
    assert_eq!(d.broker.create_calls(), 0);
    let holding = d.store.holding(1, "AAPL").await.unwrap().unwrap();
    assert_eq!(holding.quantity(), dec!(2));
    assert!(d.events.events().is_empty());
}

#[tokio::test]
async fn concurrent_buys_cannot_overdraw() {
    let d = desk(Duration::from_millis(500));
    d.engine.deposit(1, dec!(1000)).await.unwrap();

    let first = tokio::spawn({
        let engine = d.engine.clone();
        async move { engine.place_order(1, &buy(dec!(600))).await }
    });
    let second = tokio::spawn({
        let engine = d.engine.clone();
        async move { engine.place_order(1, &buy(dec!(600))).await }
    });
    let results = [first.await.unwrap(), second.await.unwrap()];

    let placed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(placed, 1);
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(SettlementError::InsufficientFunds { .. })))
        .count();
    assert_eq!(rejected, 1);

    let wallet = d.engine.wallet(1).await.unwrap();
    assert_eq!(wallet.locked(), dec!(600));
    assert_eq!(wallet.balance(), dec!(1000));
    assert_eq!(d.broker.create_calls(), 1);
}

#[tokio::test]
async fn sell_proceeds_accumulate_across_partial_fills() {
    let d = desk(Duration::from_millis(500));
    d.store.seed_holding(1, "AAPL", dec!(10), dec!(150)).unwrap();

    let order = d.engine.place_order(1, &sell(dec!(4))).await.unwrap();
    assert_eq!(order.reserved_qty, dec!(4));

    d.engine
        .reconcile_fill(&notify(&order, NotificationKind::PartialFill, dec!(1), dec!(170)))
        .await
        .unwrap();
    // Redelivery of the same partial fill changes nothing
    let replay = d
        .engine
        .reconcile_fill(&notify(&order, NotificationKind::PartialFill, dec!(1), dec!(170)))
        .await
        .unwrap();
    assert!(matches!(replay, ReconcileOutcome::Ignored(_)));

    d.engine
        .reconcile_fill(&notify(&order, NotificationKind::Fill, dec!(4), dec!(170)))
        .await
        .unwrap();

    let wallet = d.engine.wallet(1).await.unwrap();
    assert_eq!(wallet.balance(), dec!(680));
    let holding = d.store.holding(1, "AAPL").await.unwrap().unwrap();
    assert_eq!(holding.quantity(), dec!(6));

    let done = d.engine.get_order(1, order.id).await.unwrap();
    assert_eq!(done.status, OrderStatus::Filled);
    assert_eq!(done.reserved_qty, Decimal::ZERO);
}

#[tokio::test]
async fn broker_cancel_after_partial_fill_releases_the_rest() {
    let d = desk(Duration::from_millis(500));
    d.engine.deposit(1, dec!(1000)).await.unwrap();
    let order = d.engine.place_order(1, &buy(dec!(500))).await.unwrap();

    d.engine
        .reconcile_fill(&notify(&order, NotificationKind::PartialFill, dec!(1), dec!(166)))
        .await
        .unwrap();
    let outcome = d
        .engine
        .reconcile_fill(&notify(&order, NotificationKind::Canceled, dec!(1), dec!(166)))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            order_id: order.id,
            status: OrderStatus::Canceled
        }
    );

    let wallet = d.engine.wallet(1).await.unwrap();
    assert_eq!(wallet.balance(), dec!(834));
    assert_eq!(wallet.locked(), Decimal::ZERO);
    assert_eq!(
        d.events.event_types(),
        vec!["order.created", "order.filled", "order.canceled"]
    );
}

#[tokio::test]
async fn late_ack_for_locally_canceled_order_is_canceled_at_broker() {
    let d = desk(Duration::from_secs(2));
    d.engine.deposit(1, dec!(1000)).await.unwrap();
    d.broker.set_latency(Some(Duration::from_millis(200)));

    let placing = tokio::spawn({
        let engine = d.engine.clone();
        async move { engine.place_order(1, &buy(dec!(500))).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pending = d.engine.list_orders(1, Some("pending"), None).await.unwrap();
    assert_eq!(pending.len(), 1);
    let canceled = d.engine.cancel_order(1, pending[0].id).await.unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);
    assert_eq!(d.engine.wallet(1).await.unwrap().locked(), Decimal::ZERO);

    let order = placing.await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Canceled);
    assert_eq!(d.broker.canceled(), vec!["fake-1".to_string()]);
    assert_eq!(d.engine.wallet(1).await.unwrap().balance(), dec!(1000));
}

#[tokio::test]
async fn early_notification_matched_by_client_order_id() {
    let d = desk(Duration::from_secs(2));
    d.engine.deposit(1, dec!(1000)).await.unwrap();
    d.broker.set_latency(Some(Duration::from_millis(200)));

    let placing = tokio::spawn({
        let engine = d.engine.clone();
        async move { engine.place_order(1, &buy(dec!(500))).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let pending = d.engine.list_orders(1, Some("pending"), None).await.unwrap();
    assert_eq!(pending.len(), 1);

    // The broker reports the fill before our submission call returns
    let early = BrokerNotification {
        event: NotificationKind::PartialFill,
        order_id: "fake-1".into(),
        client_order_id: Some(pending[0].client_order_id()),
        filled_qty: dec!(1),
        filled_avg_price: Some(dec!(166)),
    };
    let outcome = d.engine.reconcile_fill(&early).await.unwrap();
    assert!(matches!(
        outcome,
        ReconcileOutcome::Applied {
            status: OrderStatus::PartiallyFilled,
            ..
        }
    ));

    let order = placing.await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::PartiallyFilled);
    assert_eq!(order.broker_order_id.as_deref(), Some("fake-1"));
    assert!(d.broker.canceled().is_empty());
    assert_eq!(d.engine.wallet(1).await.unwrap().locked(), dec!(334));
}
