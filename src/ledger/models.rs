/// ENFORCED LEDGER TYPES
///
/// `Wallet` and `Holding` are the only way balances and positions change.
/// Fields are private and every mutation returns `Result`, so a caller cannot
/// produce `locked > balance`, a negative balance or a negative position.
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::orders::UserId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Insufficient locked funds: locked {locked}, requested {requested}")]
    InsufficientLocked { locked: Decimal, requested: Decimal },

    #[error("Insufficient shares: held {held}, requested {requested}")]
    InsufficientShares { held: Decimal, requested: Decimal },

    #[error("Invariant violated: {0}")]
    Corrupted(String),
}

fn positive(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(amount)
}

fn add(base: Decimal, amount: Decimal) -> Result<Decimal, LedgerError> {
    base.checked_add(amount)
        .ok_or(LedgerError::InvalidAmount(amount))
}

/// Cash wallet for one user and currency
///
/// # Invariants
/// - `0 ≤ locked ≤ balance`
/// - `available = balance − locked` is never negative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Wallet {
    user_id: UserId,
    currency: String,
    #[schema(value_type = String)]
    balance: Decimal,
    #[schema(value_type = String)]
    locked: Decimal,
}

impl Wallet {
    pub fn new(user_id: UserId, currency: impl Into<String>) -> Self {
        Self {
            user_id,
            currency: currency.into(),
            balance: Decimal::ZERO,
            locked: Decimal::ZERO,
        }
    }

    /// Rebuild from stored values, rejecting rows that break the invariant.
    pub fn from_parts(
        user_id: UserId,
        currency: impl Into<String>,
        balance: Decimal,
        locked: Decimal,
    ) -> Result<Self, LedgerError> {
        if locked < Decimal::ZERO || locked > balance {
            return Err(LedgerError::Corrupted(format!(
                "wallet {}: balance={} locked={}",
                user_id, balance, locked
            )));
        }
        Ok(Self {
            user_id,
            currency: currency.into(),
            balance,
            locked,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn locked(&self) -> Decimal {
        self.locked
    }

    pub fn available(&self) -> Decimal {
        self.balance - self.locked
    }

    pub fn deposit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        self.balance = add(self.balance, positive(amount)?)?;
        Ok(())
    }

    /// Reserve funds against a pending buy.
    pub fn lock(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        let amount = positive(amount)?;
        if self.available() < amount {
            return Err(LedgerError::InsufficientFunds {
                available: self.available(),
                requested: amount,
            });
        }
        self.locked = add(self.locked, amount)?;
        Ok(())
    }

    /// Return reserved funds to available.
    pub fn unlock(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        let amount = positive(amount)?;
        if self.locked < amount {
            return Err(LedgerError::InsufficientLocked {
                locked: self.locked,
                requested: amount,
            });
        }
        self.locked -= amount;
        Ok(())
    }

    /// Spend reserved funds (buy fill).
    pub fn debit_locked(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        let amount = positive(amount)?;
        if self.locked < amount {
            return Err(LedgerError::InsufficientLocked {
                locked: self.locked,
                requested: amount,
            });
        }
        self.locked -= amount;
        self.balance -= amount;
        Ok(())
    }

    /// Spend unreserved funds.
    pub fn debit_available(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        let amount = positive(amount)?;
        if self.available() < amount {
            return Err(LedgerError::InsufficientFunds {
                available: self.available(),
                requested: amount,
            });
        }
        self.balance -= amount;
        Ok(())
    }

    /// Add proceeds (sell fill).
    pub fn credit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        self.balance = add(self.balance, positive(amount)?)?;
        Ok(())
    }
}

/// Share position for one user and symbol
///
/// # Invariants
/// - `quantity ≥ 0`
/// - `average_cost` only moves on buys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Holding {
    user_id: UserId,
    symbol: String,
    #[schema(value_type = String)]
    quantity: Decimal,
    #[schema(value_type = String)]
    average_cost: Decimal,
}

impl Holding {
    pub fn new(user_id: UserId, symbol: impl Into<String>) -> Self {
        Self {
            user_id,
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            average_cost: Decimal::ZERO,
        }
    }

    pub fn from_parts(
        user_id: UserId,
        symbol: impl Into<String>,
        quantity: Decimal,
        average_cost: Decimal,
    ) -> Result<Self, LedgerError> {
        let symbol = symbol.into();
        if quantity < Decimal::ZERO || average_cost < Decimal::ZERO {
            return Err(LedgerError::Corrupted(format!(
                "holding {}/{}: quantity={} average_cost={}",
                user_id, symbol, quantity, average_cost
            )));
        }
        Ok(Self {
            user_id,
            symbol,
            quantity,
            average_cost,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn average_cost(&self) -> Decimal {
        self.average_cost
    }

    pub fn is_empty(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Add `qty` shares bought for `cost` in total, blending the average cost
    /// by quantity.
    pub fn apply_buy(&mut self, qty: Decimal, cost: Decimal) -> Result<(), LedgerError> {
        let qty = positive(qty)?;
        if cost < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(cost));
        }
        let new_qty = add(self.quantity, qty)?;
        let total_cost = self
            .quantity
            .checked_mul(self.average_cost)
            .and_then(|prior| prior.checked_add(cost))
            .ok_or(LedgerError::InvalidAmount(cost))?;
        self.average_cost = total_cost
            .checked_div(new_qty)
            .ok_or(LedgerError::InvalidAmount(cost))?;
        self.quantity = new_qty;
        Ok(())
    }

    pub fn apply_sell(&mut self, qty: Decimal) -> Result<(), LedgerError> {
        let qty = positive(qty)?;
        if self.quantity < qty {
            return Err(LedgerError::InsufficientShares {
                held: self.quantity,
                requested: qty,
            });
        }
        self.quantity -= qty;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn funded(amount: Decimal) -> Wallet {
        let mut w = Wallet::new(1, "USD");
        w.deposit(amount).unwrap();
        w
    }

    #[test]
    fn test_lock_and_debit_locked() {
        let mut w = funded(dec!(1000));
        w.lock(dec!(500)).unwrap();
        assert_eq!(w.locked(), dec!(500));
        assert_eq!(w.available(), dec!(500));

        w.debit_locked(dec!(498)).unwrap();
        w.unlock(dec!(2)).unwrap();
        assert_eq!(w.balance(), dec!(502));
        assert_eq!(w.locked(), Decimal::ZERO);
    }

    #[test]
    fn test_lock_beyond_available_fails_without_change() {
        let mut w = funded(dec!(1000));
        w.lock(dec!(600)).unwrap();
        let err = w.lock(dec!(600)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                available: dec!(400),
                requested: dec!(600)
            }
        );
        assert_eq!(w.locked(), dec!(600));
        assert_eq!(w.balance(), dec!(1000));
    }

    #[test]
    fn test_unlock_more_than_locked_fails() {
        let mut w = funded(dec!(100));
        w.lock(dec!(10)).unwrap();
        assert!(w.unlock(dec!(11)).is_err());
        assert!(w.debit_locked(dec!(11)).is_err());
        assert_eq!(w.locked(), dec!(10));
    }

    #[test]
    fn test_debit_available_respects_lock() {
        let mut w = funded(dec!(100));
        w.lock(dec!(90)).unwrap();
        assert!(w.debit_available(dec!(11)).is_err());
        w.debit_available(dec!(10)).unwrap();
        assert_eq!(w.balance(), dec!(90));
        assert_eq!(w.available(), Decimal::ZERO);
    }

    #[test]
    fn test_non_positive_amounts_rejected() {
        let mut w = funded(dec!(100));
        assert_eq!(
            w.lock(Decimal::ZERO),
            Err(LedgerError::InvalidAmount(Decimal::ZERO))
        );
        assert!(w.credit(dec!(-1)).is_err());
        assert!(w.deposit(dec!(-5)).is_err());
    }

    #[test]
    fn test_overflowing_amounts_rejected_without_change() {
        let mut w = funded(Decimal::MAX);
        assert_eq!(w.deposit(Decimal::ONE), Err(LedgerError::InvalidAmount(Decimal::ONE)));
        assert_eq!(w.credit(Decimal::MAX), Err(LedgerError::InvalidAmount(Decimal::MAX)));
        assert_eq!(w.balance(), Decimal::MAX);

        let mut h = Holding::new(1, "AAPL");
        h.apply_buy(Decimal::MAX, Decimal::ONE).unwrap();
        assert!(h.apply_buy(Decimal::ONE, Decimal::ONE).is_err());
        assert_eq!(h.quantity(), Decimal::MAX);

        let mut h = Holding::new(1, "AAPL");
        h.apply_buy(dec!(1000), dec!(1000)).unwrap();
        assert!(h.apply_buy(Decimal::ONE, Decimal::MAX).is_err());
        assert_eq!(h.average_cost(), Decimal::ONE);
    }

    #[test]
    fn test_from_parts_rejects_corrupted_rows() {
        assert!(Wallet::from_parts(1, "USD", dec!(10), dec!(11)).is_err());
        assert!(Wallet::from_parts(1, "USD", dec!(10), dec!(-1)).is_err());
        assert!(Holding::from_parts(1, "AAPL", dec!(-1), dec!(10)).is_err());
        assert!(Wallet::from_parts(1, "USD", dec!(10), dec!(10)).is_ok());
    }

    #[test]
    fn test_holding_weighted_average_cost() {
        let mut h = Holding::new(1, "AAPL");
        h.apply_buy(dec!(2), dec!(200)).unwrap();
        assert_eq!(h.average_cost(), dec!(100));

        h.apply_buy(dec!(2), dec!(300)).unwrap();
        assert_eq!(h.quantity(), dec!(4));
        assert_eq!(h.average_cost(), dec!(125));
    }

    #[test]
    fn test_sell_keeps_average_cost() {
        let mut h = Holding::new(1, "AAPL");
        h.apply_buy(dec!(4), dec!(500)).unwrap();
        h.apply_sell(dec!(4)).unwrap();
        assert!(h.is_empty());
        assert_eq!(h.average_cost(), dec!(125));
    }

    #[test]
    fn test_oversell_rejected() {
        let mut h = Holding::new(1, "AAPL");
        h.apply_buy(dec!(2), dec!(200)).unwrap();
        assert_eq!(
            h.apply_sell(dec!(5)),
            Err(LedgerError::InsufficientShares {
                held: dec!(2),
                requested: dec!(5)
            })
        );
        assert_eq!(h.quantity(), dec!(2));
    }
}
