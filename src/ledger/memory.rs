//! In-process ledger store
//!
//! All tables live behind one mutex, so each trait call is trivially atomic.
//! Used when no PostgreSQL URL is configured and throughout the tests.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::models::{Holding, LedgerError, Wallet};
use super::store::{LedgerStore, SettleOutcome, Settlement, StoreError, apply_delta};
use crate::orders::{Order, OrderId, OrderSide, OrderStatus, UserId};

#[derive(Default)]
struct Tables {
    accounts: HashMap<UserId, bool>,
    wallets: HashMap<(UserId, String), Wallet>,
    holdings: HashMap<(UserId, String), Holding>,
    orders: HashMap<OrderId, Order>,
    broker_index: HashMap<String, OrderId>,
}

impl Tables {
    fn committed_sell_qty(&self, user_id: UserId, symbol: &str) -> Decimal {
        self.orders
            .values()
            .filter(|o| {
                o.user_id == user_id
                    && o.side == OrderSide::Sell
                    && o.symbol == symbol
                    && !o.status.is_terminal()
            })
            .map(|o| o.reserved_qty)
            .sum()
    }

    fn held_qty(&self, user_id: UserId, symbol: &str) -> Decimal {
        self.holdings
            .get(&(user_id, symbol.to_string()))
            .map(|h| h.quantity())
            .unwrap_or(Decimal::ZERO)
    }
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    tables: Mutex<Tables>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Database("ledger mutex poisoned".into()))
    }

    /// Put a position directly on the books (fixtures and dev seeding).
    pub fn seed_holding(
        &self,
        user_id: UserId,
        symbol: &str,
        quantity: Decimal,
        average_cost: Decimal,
    ) -> Result<(), StoreError> {
        let holding = Holding::from_parts(user_id, symbol, quantity, average_cost)?;
        let mut tables = self.tables()?;
        tables.accounts.entry(user_id).or_insert(true);
        tables
            .holdings
            .insert((user_id, symbol.to_string()), holding);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.tables().map(|_| ())
    }

    async fn is_account_active(&self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.tables()?.accounts.get(&user_id).copied().unwrap_or(false))
    }

    async fn set_account_active(&self, user_id: UserId, active: bool) -> Result<(), StoreError> {
        self.tables()?.accounts.insert(user_id, active);
        Ok(())
    }

    async fn deposit(
        &self,
        user_id: UserId,
        currency: &str,
        amount: Decimal,
    ) -> Result<Wallet, StoreError> {
        let mut tables = self.tables()?;
        let key = (user_id, currency.to_string());
        let mut wallet = tables
            .wallets
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Wallet::new(user_id, currency));
        wallet.deposit(amount)?;
        tables.accounts.entry(user_id).or_insert(true);
        tables.wallets.insert(key, wallet.clone());
        Ok(wallet)
    }

    async fn wallet(&self, user_id: UserId, currency: &str) -> Result<Option<Wallet>, StoreError> {
        Ok(self
            .tables()?
            .wallets
            .get(&(user_id, currency.to_string()))
            .cloned())
    }

    async fn holding(&self, user_id: UserId, symbol: &str) -> Result<Option<Holding>, StoreError> {
        Ok(self
            .tables()?
            .holdings
            .get(&(user_id, symbol.to_string()))
            .cloned())
    }

    async fn holdings(&self, user_id: UserId) -> Result<Vec<Holding>, StoreError> {
        let tables = self.tables()?;
        let mut holdings: Vec<Holding> = tables
            .holdings
            .values()
            .filter(|h| h.user_id() == user_id)
            .cloned()
            .collect();
        holdings.sort_by(|a, b| a.symbol().cmp(b.symbol()));
        Ok(holdings)
    }

    async fn committed_sell_qty(
        &self,
        user_id: UserId,
        symbol: &str,
    ) -> Result<Decimal, StoreError> {
        Ok(self.tables()?.committed_sell_qty(user_id, symbol))
    }

    async fn open_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        if tables.orders.contains_key(&order.id) {
            return Err(StoreError::DuplicateOrder(order.id.to_string()));
        }

        match order.side {
            OrderSide::Buy => {
                let key = (order.user_id, order.currency.clone());
                let mut wallet = tables
                    .wallets
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| Wallet::new(order.user_id, &order.currency));
                wallet.lock(order.locked_amount)?;
                tables.wallets.insert(key, wallet);
            }
            OrderSide::Sell => {
                let free = tables.held_qty(order.user_id, &order.symbol)
                    - tables.committed_sell_qty(order.user_id, &order.symbol);
                if free < order.reserved_qty {
                    return Err(LedgerError::InsufficientShares {
                        held: free.max(Decimal::ZERO),
                        requested: order.reserved_qty,
                    }
                    .into());
                }
            }
        }

        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn attach_broker_order(
        &self,
        order_id: OrderId,
        broker_order_id: &str,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables()?;
        let Some(order) = tables.orders.get_mut(&order_id) else {
            return Err(StoreError::OrderNotFound(order_id.to_string()));
        };
        if order.status != OrderStatus::Pending {
            return Ok(false);
        }
        order.status = OrderStatus::New;
        order.broker_order_id = Some(broker_order_id.to_string());
        order.updated_at = Utc::now();
        tables
            .broker_index
            .insert(broker_order_id.to_string(), order_id);
        Ok(true)
    }

    async fn apply_settlement(&self, s: &Settlement) -> Result<SettleOutcome, StoreError> {
        let mut tables = self.tables()?;
        let Some(order) = tables.orders.get(&s.order_id) else {
            return Err(StoreError::OrderNotFound(s.order_id.to_string()));
        };
        if order.status != s.expected_status || order.filled_qty != s.expected_filled_qty {
            return Ok(SettleOutcome::Conflict);
        }

        let wallet_key = (s.user_id, s.currency.clone());
        let holding_key = (s.user_id, s.symbol.clone());
        let mut wallet = tables
            .wallets
            .get(&wallet_key)
            .cloned()
            .unwrap_or_else(|| Wallet::new(s.user_id, &s.currency));
        let mut holding = tables
            .holdings
            .get(&holding_key)
            .cloned()
            .unwrap_or_else(|| Holding::new(s.user_id, &s.symbol));

        // Work on copies; commit only when every step succeeded
        let receipt = apply_delta(&mut wallet, &mut holding, &s.delta)?;

        tables.wallets.insert(wallet_key, wallet);
        if holding.is_empty() {
            tables.holdings.remove(&holding_key);
        } else {
            tables.holdings.insert(holding_key, holding);
        }

        if let Some(order) = tables.orders.get_mut(&s.order_id) {
            order.status = s.new_status;
            order.filled_qty = s.filled_qty;
            order.filled_avg_price = s.filled_avg_price;
            order.locked_amount = s.locked_amount;
            order.reserved_qty = s.reserved_qty;
            order.shortfall = order.shortfall.saturating_add(receipt.cash_shortfall);
            if s.failure_reason.is_some() {
                order.failure_reason = s.failure_reason.clone();
            }
            order.updated_at = Utc::now();
        }

        Ok(SettleOutcome::Applied(receipt))
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.tables()?.orders.get(&order_id).cloned())
    }

    async fn order_by_broker_id(&self, broker_order_id: &str) -> Result<Option<Order>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .broker_index
            .get(broker_order_id)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn list_orders(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
        limit: u32,
    ) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables()?;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.user_id == user_id && status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders.truncate(limit as usize);
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::{LedgerDelta, SettlementReceipt};
    use crate::orders::OrderSize;
    use rust_decimal_macros::dec;

    fn buy(user_id: UserId, lock: Decimal) -> Order {
        Order::pending(
            user_id,
            "AAPL".into(),
            OrderSide::Buy,
            OrderSize::Notional(lock),
            "USD".into(),
            lock,
            Decimal::ZERO,
        )
    }

    fn sell(user_id: UserId, qty: Decimal) -> Order {
        Order::pending(
            user_id,
            "AAPL".into(),
            OrderSide::Sell,
            OrderSize::Quantity(qty),
            "USD".into(),
            Decimal::ZERO,
            qty,
        )
    }

    #[tokio::test]
    async fn test_deposit_creates_active_account() {
        let store = MemoryLedgerStore::new();
        assert!(!store.is_account_active(7).await.unwrap());
        let wallet = store.deposit(7, "USD", dec!(100)).await.unwrap();
        assert_eq!(wallet.balance(), dec!(100));
        assert!(store.is_account_active(7).await.unwrap());

        store.set_account_active(7, false).await.unwrap();
        assert!(!store.is_account_active(7).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_buy_locks_funds_atomically() {
        let store = MemoryLedgerStore::new();
        store.deposit(1, "USD", dec!(1000)).await.unwrap();

        store.open_order(&buy(1, dec!(600))).await.unwrap();
        let err = store.open_order(&buy(1, dec!(600))).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Ledger(LedgerError::InsufficientFunds { .. })
        ));

        let wallet = store.wallet(1, "USD").await.unwrap().unwrap();
        assert_eq!(wallet.locked(), dec!(600));
        assert_eq!(store.list_orders(1, None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_sell_counts_open_sells() {
        let store = MemoryLedgerStore::new();
        store.seed_holding(1, "AAPL", dec!(5), dec!(100)).unwrap();

        store.open_order(&sell(1, dec!(3))).await.unwrap();
        assert_eq!(
            store.committed_sell_qty(1, "AAPL").await.unwrap(),
            dec!(3)
        );
        let err = store.open_order(&sell(1, dec!(3))).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Ledger(LedgerError::InsufficientShares { held, .. }) if held == dec!(2)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_order_rejected() {
        let store = MemoryLedgerStore::new();
        store.deposit(1, "USD", dec!(1000)).await.unwrap();
        let order = buy(1, dec!(10));
        store.open_order(&order).await.unwrap();
        assert!(matches!(
            store.open_order(&order).await,
            Err(StoreError::DuplicateOrder(_))
        ));
    }

    #[tokio::test]
    async fn test_attach_broker_order_is_cas() {
        let store = MemoryLedgerStore::new();
        store.deposit(1, "USD", dec!(100)).await.unwrap();
        let order = buy(1, dec!(10));
        store.open_order(&order).await.unwrap();

        assert!(store.attach_broker_order(order.id, "b-1").await.unwrap());
        assert!(!store.attach_broker_order(order.id, "b-2").await.unwrap());

        let found = store.order_by_broker_id("b-1").await.unwrap().unwrap();
        assert_eq!(found.status, OrderStatus::New);
        assert!(store.order_by_broker_id("b-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settlement_conflict_writes_nothing() {
        let store = MemoryLedgerStore::new();
        store.deposit(1, "USD", dec!(100)).await.unwrap();
        let order = buy(1, dec!(10));
        store.open_order(&order).await.unwrap();

        let settlement = Settlement {
            order_id: order.id,
            user_id: 1,
            symbol: "AAPL".into(),
            side: OrderSide::Buy,
            currency: "USD".into(),
            expected_status: OrderStatus::New,
            expected_filled_qty: Decimal::ZERO,
            new_status: OrderStatus::Canceled,
            filled_qty: Decimal::ZERO,
            filled_avg_price: None,
            locked_amount: Decimal::ZERO,
            reserved_qty: Decimal::ZERO,
            failure_reason: None,
            delta: LedgerDelta::Release { amount: dec!(10) },
        };
        assert_eq!(
            store.apply_settlement(&settlement).await.unwrap(),
            SettleOutcome::Conflict
        );
        assert_eq!(
            store.wallet(1, "USD").await.unwrap().unwrap().locked(),
            dec!(10)
        );

        let settlement = Settlement {
            expected_status: OrderStatus::Pending,
            ..settlement
        };
        assert_eq!(
            store.apply_settlement(&settlement).await.unwrap(),
            SettleOutcome::Applied(SettlementReceipt::default())
        );
        assert_eq!(
            store.wallet(1, "USD").await.unwrap().unwrap().locked(),
            Decimal::ZERO
        );
        // Second application no longer matches the expected status
        assert_eq!(
            store.apply_settlement(&settlement).await.unwrap(),
            SettleOutcome::Conflict
        );
    }

    #[tokio::test]
    async fn test_list_orders_filters_and_limits() {
        let store = MemoryLedgerStore::new();
        store.deposit(1, "USD", dec!(1000)).await.unwrap();
        store.deposit(2, "USD", dec!(1000)).await.unwrap();
        for _ in 0..3 {
            store.open_order(&buy(1, dec!(10))).await.unwrap();
        }
        store.open_order(&buy(2, dec!(10))).await.unwrap();

        assert_eq!(store.list_orders(1, None, 10).await.unwrap().len(), 3);
        assert_eq!(store.list_orders(1, None, 2).await.unwrap().len(), 2);
        assert!(
            store
                .list_orders(1, Some(OrderStatus::Filled), 10)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
