//! Order state transitions
//!
//! `(current order, event) -> settlement` with no I/O. The engine applies the
//! returned [`Settlement`] as one conditional store update, so the same
//! notification delivered twice matches the stored state only once.

use rust_decimal::Decimal;
use std::fmt;

use super::state::OrderStatus;
use super::types::{BrokerNotification, NotificationKind, Order, OrderSide};
use crate::ledger::{LedgerDelta, Settlement};

/// Why a notification changed nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    /// Order already reached a sink state
    Terminal(OrderStatus),
    /// Cumulative quantity not beyond what is recorded
    Duplicate,
    /// Fill reports less than already recorded
    Stale,
    Invalid(&'static str),
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::Terminal(s) => write!(f, "order already {}", s),
            Skip::Duplicate => write!(f, "duplicate notification"),
            Skip::Stale => write!(f, "stale notification"),
            Skip::Invalid(why) => write!(f, "invalid notification: {}", why),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Ignore(Skip),
    Apply(Settlement),
}

/// Settle a broker notification against the order as currently stored.
pub fn transition(order: &Order, n: &BrokerNotification) -> Transition {
    if order.status.is_terminal() {
        return Transition::Ignore(Skip::Terminal(order.status));
    }
    if n.filled_qty < Decimal::ZERO {
        return Transition::Ignore(Skip::Invalid("negative filled quantity"));
    }

    match n.event {
        NotificationKind::PartialFill if n.filled_qty <= order.filled_qty => {
            return Transition::Ignore(Skip::Duplicate);
        }
        NotificationKind::Fill if n.filled_qty.is_zero() => {
            return Transition::Ignore(Skip::Invalid("fill without quantity"));
        }
        NotificationKind::Fill if n.filled_qty < order.filled_qty => {
            return Transition::Ignore(Skip::Stale);
        }
        _ => {}
    }

    let fill_qty = (n.filled_qty - order.filled_qty).max(Decimal::ZERO);
    let avg_price = if fill_qty > Decimal::ZERO {
        match n.filled_avg_price {
            Some(p) if p > Decimal::ZERO => Some(p),
            _ => return Transition::Ignore(Skip::Invalid("fill without price")),
        }
    } else {
        order.filled_avg_price
    };

    let Some(fill_value) = increment_value(order, n.filled_qty, fill_qty, avg_price) else {
        return Transition::Ignore(Skip::Invalid("fill value overflow"));
    };

    Transition::Apply(step(
        order,
        n.event.target_status(),
        fill_qty,
        fill_value,
        avg_price,
        None,
    ))
}

/// Value of this increment: new cumulative value minus what was settled.
/// `None` when the product does not fit a `Decimal`.
fn increment_value(
    order: &Order,
    filled_qty: Decimal,
    fill_qty: Decimal,
    avg_price: Option<Decimal>,
) -> Option<Decimal> {
    let price = match avg_price {
        Some(price) if fill_qty > Decimal::ZERO => price,
        _ => return Some(Decimal::ZERO),
    };
    let value = filled_qty
        .checked_mul(price)?
        .checked_sub(order.filled_value()?)?;
    if value > Decimal::ZERO {
        Some(value)
    } else {
        fill_qty.checked_mul(price)
    }
}

/// Owner-initiated cancel. `None` unless the order is still cancelable.
pub fn local_cancel(order: &Order) -> Option<Settlement> {
    if !order.status.is_cancelable() {
        return None;
    }
    Some(step(
        order,
        OrderStatus::Canceled,
        Decimal::ZERO,
        Decimal::ZERO,
        order.filled_avg_price,
        None,
    ))
}

/// Broker submission failed or timed out: release everything, mark failed.
pub fn submission_failed(order: &Order, reason: impl Into<String>) -> Settlement {
    step(
        order,
        OrderStatus::Failed,
        Decimal::ZERO,
        Decimal::ZERO,
        None,
        Some(reason.into()),
    )
}

/// Funds returned to available by this settlement.
pub fn released_amount(delta: &LedgerDelta) -> Decimal {
    match delta {
        LedgerDelta::Buy { release, .. } => *release,
        LedgerDelta::Release { amount } => *amount,
        _ => Decimal::ZERO,
    }
}

fn step(
    order: &Order,
    new_status: OrderStatus,
    fill_qty: Decimal,
    fill_value: Decimal,
    avg_price: Option<Decimal>,
    failure_reason: Option<String>,
) -> Settlement {
    // fill_qty is the gap to a cumulative quantity that already fits
    let filled_qty = order.filled_qty + fill_qty;
    let terminal = new_status.is_terminal();

    let (delta, locked_amount, reserved_qty) = match order.side {
        OrderSide::Buy => {
            let from_lock = fill_value.min(order.locked_amount);
            let remaining = order.locked_amount - from_lock;
            let release = if terminal { remaining } else { Decimal::ZERO };
            let delta = if fill_qty > Decimal::ZERO {
                LedgerDelta::Buy {
                    qty: fill_qty,
                    cost: fill_value,
                    from_lock,
                    release,
                }
            } else if release > Decimal::ZERO {
                LedgerDelta::Release { amount: release }
            } else {
                LedgerDelta::None
            };
            (delta, remaining - release, Decimal::ZERO)
        }
        OrderSide::Sell => {
            let reserved = if terminal {
                Decimal::ZERO
            } else {
                (order.reserved_qty - fill_qty).max(Decimal::ZERO)
            };
            let delta = if fill_qty > Decimal::ZERO {
                LedgerDelta::Sell {
                    qty: fill_qty,
                    proceeds: fill_value,
                }
            } else {
                LedgerDelta::None
            };
            (delta, order.locked_amount, reserved)
        }
    };

    Settlement {
        order_id: order.id,
        user_id: order.user_id,
        symbol: order.symbol.clone(),
        side: order.side,
        currency: order.currency.clone(),
        expected_status: order.status,
        expected_filled_qty: order.filled_qty,
        new_status,
        filled_qty,
        filled_avg_price: avg_price,
        locked_amount,
        reserved_qty,
        failure_reason,
        delta,
    }
}
