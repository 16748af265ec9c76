//! Ledger store seam
//!
//! Every mutation here is one atomic conditional update: either the whole
//! change commits or nothing does. Implementations must never hold an
//! in-process lock across an await on an external system.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use super::models::{Holding, LedgerError, Wallet};
use crate::orders::{Order, OrderId, OrderSide, OrderStatus, UserId};

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Business rule rejected the update; nothing was written
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Duplicate order: {0}")]
    DuplicateOrder(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupted record: {0}")]
    Corrupted(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return StoreError::DuplicateOrder(db.message().to_string());
            }
        }
        StoreError::Database(e.to_string())
    }
}

/// Wallet / holding side effects of one settlement step
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerDelta {
    None,
    /// Buy fill: add `qty` shares at total `cost`. `from_lock` of the cost is
    /// taken from the order's hold, the remainder from available funds.
    /// `release` returns leftover hold to available.
    Buy {
        qty: Decimal,
        cost: Decimal,
        from_lock: Decimal,
        release: Decimal,
    },
    /// Sell fill: remove `qty` shares, credit `proceeds`.
    Sell { qty: Decimal, proceeds: Decimal },
    /// Return held funds without a fill (cancel, reject, failure).
    Release { amount: Decimal },
}

/// One compare-and-swap step of an order plus its ledger effects.
///
/// Applies only while the stored order still has `expected_status` and
/// `expected_filled_qty`; otherwise the store reports a conflict and writes
/// nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub symbol: String,
    pub side: OrderSide,
    pub currency: String,
    pub expected_status: OrderStatus,
    pub expected_filled_qty: Decimal,
    pub new_status: OrderStatus,
    pub filled_qty: Decimal,
    pub filled_avg_price: Option<Decimal>,
    pub locked_amount: Decimal,
    pub reserved_qty: Decimal,
    pub failure_reason: Option<String>,
    pub delta: LedgerDelta,
}

/// What a committed settlement could not fully apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettlementReceipt {
    /// Buy cost neither the hold nor available funds covered
    pub cash_shortfall: Decimal,
    /// Sold shares the holding did not have
    pub share_shortfall: Decimal,
}

/// Result of a conditional settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Applied(SettlementReceipt),
    /// The order moved since it was read
    Conflict,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn health_check(&self) -> Result<(), StoreError>;

    async fn is_account_active(&self, user_id: UserId) -> Result<bool, StoreError>;

    /// Create or update the account record.
    async fn set_account_active(&self, user_id: UserId, active: bool) -> Result<(), StoreError>;

    /// Credit funds, creating the account and wallet on first use.
    async fn deposit(
        &self,
        user_id: UserId,
        currency: &str,
        amount: Decimal,
    ) -> Result<Wallet, StoreError>;

    async fn wallet(&self, user_id: UserId, currency: &str) -> Result<Option<Wallet>, StoreError>;

    async fn holding(&self, user_id: UserId, symbol: &str) -> Result<Option<Holding>, StoreError>;

    async fn holdings(&self, user_id: UserId) -> Result<Vec<Holding>, StoreError>;

    /// Shares committed to non-terminal sell orders for this position.
    async fn committed_sell_qty(&self, user_id: UserId, symbol: &str)
    -> Result<Decimal, StoreError>;

    /// Insert a `pending` order together with its hold.
    ///
    /// Buys lock `order.locked_amount` only if available funds cover it.
    /// Sells succeed only if the holding minus shares committed to other open
    /// sells covers `order.reserved_qty`. On rejection nothing is written.
    async fn open_order(&self, order: &Order) -> Result<(), StoreError>;

    /// `pending → new` with the broker's order ID. False if the order left
    /// `pending` in the meantime.
    async fn attach_broker_order(
        &self,
        order_id: OrderId,
        broker_order_id: &str,
    ) -> Result<bool, StoreError>;

    async fn apply_settlement(&self, settlement: &Settlement) -> Result<SettleOutcome, StoreError>;

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    async fn order_by_broker_id(&self, broker_order_id: &str) -> Result<Option<Order>, StoreError>;

    /// Newest first.
    async fn list_orders(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
        limit: u32,
    ) -> Result<Vec<Order>, StoreError>;
}

/// Apply `delta` to in-memory ledger rows. Shared by every store so the
/// arithmetic is identical whatever the persistence.
pub(crate) fn apply_delta(
    wallet: &mut Wallet,
    holding: &mut Holding,
    delta: &LedgerDelta,
) -> Result<SettlementReceipt, LedgerError> {
    let mut receipt = SettlementReceipt::default();
    match delta {
        LedgerDelta::None => {}
        LedgerDelta::Buy {
            qty,
            cost,
            from_lock,
            release,
        } => {
            if *from_lock > Decimal::ZERO {
                wallet.debit_locked(*from_lock)?;
            }
            let overflow = *cost - *from_lock;
            if overflow > Decimal::ZERO {
                let cover = overflow.min(wallet.available());
                if cover > Decimal::ZERO {
                    wallet.debit_available(cover)?;
                }
                receipt.cash_shortfall = overflow - cover;
            }
            if *release > Decimal::ZERO {
                wallet.unlock(*release)?;
            }
            if *qty > Decimal::ZERO {
                holding.apply_buy(*qty, *cost)?;
            }
        }
        LedgerDelta::Sell { qty, proceeds } => {
            let sold = (*qty).min(holding.quantity());
            if sold > Decimal::ZERO {
                holding.apply_sell(sold)?;
            }
            receipt.share_shortfall = *qty - sold;
            if *proceeds > Decimal::ZERO {
                wallet.credit(*proceeds)?;
            }
        }
        LedgerDelta::Release { amount } => {
            if *amount > Decimal::ZERO {
                wallet.unlock(*amount)?;
            }
        }
    }
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn wallet(balance: Decimal, locked: Decimal) -> Wallet {
        Wallet::from_parts(1, "USD", balance, locked).unwrap()
    }

    #[test]
    fn test_buy_within_lock_releases_excess() {
        let mut w = wallet(dec!(1000), dec!(500));
        let mut h = Holding::new(1, "AAPL");
        let receipt = apply_delta(
            &mut w,
            &mut h,
            &LedgerDelta::Buy {
                qty: dec!(3),
                cost: dec!(498),
                from_lock: dec!(498),
                release: dec!(2),
            },
        )
        .unwrap();
        assert_eq!(receipt, SettlementReceipt::default());
        assert_eq!(w.balance(), dec!(502));
        assert_eq!(w.locked(), Decimal::ZERO);
        assert_eq!(h.quantity(), dec!(3));
        assert_eq!(h.average_cost(), dec!(166));
    }

    #[test]
    fn test_buy_over_lock_draws_available_then_records_shortfall() {
        let mut w = wallet(dec!(110), dec!(101));
        let mut h = Holding::new(1, "AAPL");
        let receipt = apply_delta(
            &mut w,
            &mut h,
            &LedgerDelta::Buy {
                qty: dec!(1),
                cost: dec!(120),
                from_lock: dec!(101),
                release: Decimal::ZERO,
            },
        )
        .unwrap();
        // 101 from hold, 9 from available, 10 uncovered
        assert_eq!(receipt.cash_shortfall, dec!(10));
        assert_eq!(w.balance(), Decimal::ZERO);
        assert_eq!(w.locked(), Decimal::ZERO);
        assert_eq!(h.average_cost(), dec!(120));
    }

    #[test]
    fn test_sell_never_drives_holding_negative() {
        let mut w = wallet(Decimal::ZERO, Decimal::ZERO);
        let mut h = Holding::from_parts(1, "AAPL", dec!(2), dec!(100)).unwrap();
        let receipt = apply_delta(
            &mut w,
            &mut h,
            &LedgerDelta::Sell {
                qty: dec!(3),
                proceeds: dec!(330),
            },
        )
        .unwrap();
        assert_eq!(receipt.share_shortfall, dec!(1));
        assert!(h.is_empty());
        assert_eq!(w.balance(), dec!(330));
    }

    #[test]
    fn test_release_more_than_locked_is_rejected() {
        let mut w = wallet(dec!(100), dec!(10));
        let mut h = Holding::new(1, "AAPL");
        let err = apply_delta(&mut w, &mut h, &LedgerDelta::Release { amount: dec!(20) });
        assert!(err.is_err());
    }
}
