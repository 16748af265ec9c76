//! PostgreSQL ledger store
//!
//! Holds are taken with conditional UPDATEs and settlements run in one
//! transaction guarded by a compare-and-swap on the order row, so concurrent
//! requests against the same wallet are serialized by the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Transaction};

use super::models::{Holding, LedgerError, Wallet};
use super::store::{
    LedgerDelta, LedgerStore, SettleOutcome, Settlement, SettlementReceipt, StoreError, apply_delta,
};
use crate::db::{Database, read_column};
use crate::orders::{Order, OrderId, OrderSide, OrderStatus, UserId};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts_tb (
        user_id BIGINT PRIMARY KEY,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wallets_tb (
        user_id BIGINT NOT NULL,
        currency VARCHAR(8) NOT NULL,
        balance NUMERIC NOT NULL DEFAULT 0,
        locked NUMERIC NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (user_id, currency),
        CONSTRAINT wallet_lock_bounds CHECK (locked >= 0 AND locked <= balance)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS holdings_tb (
        user_id BIGINT NOT NULL,
        symbol VARCHAR(16) NOT NULL,
        quantity NUMERIC NOT NULL,
        average_cost NUMERIC NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (user_id, symbol),
        CONSTRAINT holding_non_negative CHECK (quantity >= 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders_tb (
        order_id VARCHAR(26) PRIMARY KEY,
        user_id BIGINT NOT NULL,
        symbol VARCHAR(16) NOT NULL,
        side SMALLINT NOT NULL,
        amount NUMERIC,
        quantity NUMERIC,
        currency VARCHAR(8) NOT NULL,
        status SMALLINT NOT NULL,
        broker_order_id VARCHAR(64) UNIQUE,
        filled_qty NUMERIC NOT NULL DEFAULT 0,
        filled_avg_price NUMERIC,
        locked_amount NUMERIC NOT NULL DEFAULT 0,
        reserved_qty NUMERIC NOT NULL DEFAULT 0,
        shortfall NUMERIC NOT NULL DEFAULT 0,
        failure_reason TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_orders_user_created ON orders_tb (user_id, created_at DESC)",
];

const ORDER_COLUMNS: &str = "order_id, user_id, symbol, side, amount, quantity, currency, status, \
    broker_order_id, filled_qty, filled_avg_price, locked_amount, reserved_qty, shortfall, \
    failure_reason, created_at, updated_at";

/// Statuses counted as open for the oversell guard
const OPEN_STATUSES: [i16; 3] = [
    OrderStatus::Pending.id(),
    OrderStatus::New.id(),
    OrderStatus::PartiallyFilled.id(),
];

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables if missing. Idempotent.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Ledger schema ready");
        Ok(())
    }

    async fn wallet_for_update(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        currency: &str,
    ) -> Result<Wallet, StoreError> {
        let row = sqlx::query(
            "SELECT balance, locked FROM wallets_tb WHERE user_id = $1 AND currency = $2 FOR UPDATE",
        )
        .bind(user_id)
        .bind(currency)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => Ok(Wallet::from_parts(
                user_id,
                currency,
                col(&row, "balance")?,
                col(&row, "locked")?,
            )?),
            None => Ok(Wallet::new(user_id, currency)),
        }
    }

    async fn holding_for_update(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        symbol: &str,
    ) -> Result<Holding, StoreError> {
        let row = sqlx::query(
            "SELECT quantity, average_cost FROM holdings_tb WHERE user_id = $1 AND symbol = $2 FOR UPDATE",
        )
        .bind(user_id)
        .bind(symbol)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => Ok(Holding::from_parts(
                user_id,
                symbol,
                col(&row, "quantity")?,
                col(&row, "average_cost")?,
            )?),
            None => Ok(Holding::new(user_id, symbol)),
        }
    }

    async fn save_wallet(
        tx: &mut Transaction<'_, Postgres>,
        wallet: &Wallet,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO wallets_tb (user_id, currency, balance, locked, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (user_id, currency)
            DO UPDATE SET balance = EXCLUDED.balance, locked = EXCLUDED.locked, updated_at = NOW()
            "#,
        )
        .bind(wallet.user_id())
        .bind(wallet.currency())
        .bind(wallet.balance())
        .bind(wallet.locked())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn save_holding(
        tx: &mut Transaction<'_, Postgres>,
        holding: &Holding,
    ) -> Result<(), StoreError> {
        if holding.is_empty() {
            sqlx::query("DELETE FROM holdings_tb WHERE user_id = $1 AND symbol = $2")
                .bind(holding.user_id())
                .bind(holding.symbol())
                .execute(&mut **tx)
                .await?;
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO holdings_tb (user_id, symbol, quantity, average_cost, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (user_id, symbol)
            DO UPDATE SET quantity = EXCLUDED.quantity, average_cost = EXCLUDED.average_cost, updated_at = NOW()
            "#,
        )
        .bind(holding.user_id())
        .bind(holding.symbol())
        .bind(holding.quantity())
        .bind(holding.average_cost())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn committed_sell_qty_in<'e, E>(
        executor: E,
        user_id: UserId,
        symbol: &str,
    ) -> Result<Decimal, StoreError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(reserved_qty), 0) AS committed
            FROM orders_tb
            WHERE user_id = $1 AND symbol = $2 AND side = $3 AND status = ANY($4)
            "#,
        )
        .bind(user_id)
        .bind(symbol)
        .bind(OrderSide::Sell.id())
        .bind(&OPEN_STATUSES[..])
        .fetch_one(executor)
        .await?;
        col(&row, "committed")
    }
}

fn col<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    read_column(row, column)
        .ok_or_else(|| StoreError::Corrupted(format!("unreadable column '{}'", column)))
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let id: String = col(row, "order_id")?;
    let side: i16 = col(row, "side")?;
    let status: i16 = col(row, "status")?;
    Ok(Order {
        id: id
            .parse()
            .map_err(|_| StoreError::Corrupted(format!("order id '{}'", id)))?,
        user_id: col(row, "user_id")?,
        symbol: col(row, "symbol")?,
        side: OrderSide::from_id(side)
            .ok_or_else(|| StoreError::Corrupted(format!("order {} side {}", id, side)))?,
        amount: col(row, "amount")?,
        quantity: col(row, "quantity")?,
        currency: col(row, "currency")?,
        status: OrderStatus::from_id(status)
            .ok_or_else(|| StoreError::Corrupted(format!("order {} status {}", id, status)))?,
        broker_order_id: col(row, "broker_order_id")?,
        filled_qty: col(row, "filled_qty")?,
        filled_avg_price: col(row, "filled_avg_price")?,
        locked_amount: col(row, "locked_amount")?,
        reserved_qty: col(row, "reserved_qty")?,
        shortfall: col(row, "shortfall")?,
        failure_reason: col(row, "failure_reason")?,
        created_at: col::<DateTime<Utc>>(row, "created_at")?,
        updated_at: col::<DateTime<Utc>>(row, "updated_at")?,
    })
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Database::ping(&self.pool).await?;
        Ok(())
    }

    async fn is_account_active(&self, user_id: UserId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT active FROM accounts_tb WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => col(&row, "active"),
            None => Ok(false),
        }
    }

    async fn set_account_active(&self, user_id: UserId, active: bool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts_tb (user_id, active) VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET active = EXCLUDED.active
            "#,
        )
        .bind(user_id)
        .bind(active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deposit(
        &self,
        user_id: UserId,
        currency: &str,
        amount: Decimal,
    ) -> Result<Wallet, StoreError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount).into());
        }
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO accounts_tb (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let mut wallet = Self::wallet_for_update(&mut tx, user_id, currency).await?;
        wallet.deposit(amount)?;
        Self::save_wallet(&mut tx, &wallet).await?;

        tx.commit().await?;
        Ok(wallet)
    }

    async fn wallet(&self, user_id: UserId, currency: &str) -> Result<Option<Wallet>, StoreError> {
        let row =
            sqlx::query("SELECT balance, locked FROM wallets_tb WHERE user_id = $1 AND currency = $2")
                .bind(user_id)
                .bind(currency)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|row| -> Result<Wallet, StoreError> {
            Ok(Wallet::from_parts(
                user_id,
                currency,
                col(&row, "balance")?,
                col(&row, "locked")?,
            )?)
        })
        .transpose()
    }

    async fn holding(&self, user_id: UserId, symbol: &str) -> Result<Option<Holding>, StoreError> {
        let row = sqlx::query(
            "SELECT quantity, average_cost FROM holdings_tb WHERE user_id = $1 AND symbol = $2",
        )
        .bind(user_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| -> Result<Holding, StoreError> {
            Ok(Holding::from_parts(
                user_id,
                symbol,
                col(&row, "quantity")?,
                col(&row, "average_cost")?,
            )?)
        })
        .transpose()
    }

    async fn holdings(&self, user_id: UserId) -> Result<Vec<Holding>, StoreError> {
        let rows = sqlx::query(
            "SELECT symbol, quantity, average_cost FROM holdings_tb WHERE user_id = $1 ORDER BY symbol",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<Holding, StoreError> {
                let symbol: String = col(row, "symbol")?;
                Ok(Holding::from_parts(
                    user_id,
                    symbol,
                    col(row, "quantity")?,
                    col(row, "average_cost")?,
                )?)
            })
            .collect()
    }

    async fn committed_sell_qty(
        &self,
        user_id: UserId,
        symbol: &str,
    ) -> Result<Decimal, StoreError> {
        Self::committed_sell_qty_in(&self.pool, user_id, symbol).await
    }

    async fn open_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        match order.side {
            OrderSide::Buy => {
                let result = sqlx::query(
                    r#"
                    UPDATE wallets_tb
                    SET locked = locked + $1, updated_at = NOW()
                    WHERE user_id = $2 AND currency = $3 AND balance - locked >= $1
                    "#,
                )
                .bind(order.locked_amount)
                .bind(order.user_id)
                .bind(&order.currency)
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    let wallet = Self::wallet_for_update(&mut tx, order.user_id, &order.currency)
                        .await?;
                    return Err(LedgerError::InsufficientFunds {
                        available: wallet.available(),
                        requested: order.locked_amount,
                    }
                    .into());
                }
            }
            OrderSide::Sell => {
                // Row lock serializes concurrent sells of the same position
                let holding =
                    Self::holding_for_update(&mut tx, order.user_id, &order.symbol).await?;
                let committed =
                    Self::committed_sell_qty_in(&mut *tx, order.user_id, &order.symbol).await?;
                let free = holding.quantity() - committed;
                if free < order.reserved_qty {
                    return Err(LedgerError::InsufficientShares {
                        held: free.max(Decimal::ZERO),
                        requested: order.reserved_qty,
                    }
                    .into());
                }
            }
        }

        sqlx::query(&format!(
            "INSERT INTO orders_tb ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
            ORDER_COLUMNS
        ))
        .bind(order.id.to_string())
        .bind(order.user_id)
        .bind(&order.symbol)
        .bind(order.side.id())
        .bind(order.amount)
        .bind(order.quantity)
        .bind(&order.currency)
        .bind(order.status.id())
        .bind(&order.broker_order_id)
        .bind(order.filled_qty)
        .bind(order.filled_avg_price)
        .bind(order.locked_amount)
        .bind(order.reserved_qty)
        .bind(order.shortfall)
        .bind(&order.failure_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn attach_broker_order(
        &self,
        order_id: OrderId,
        broker_order_id: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE orders_tb
            SET status = $1, broker_order_id = $2, updated_at = NOW()
            WHERE order_id = $3 AND status = $4
            "#,
        )
        .bind(OrderStatus::New.id())
        .bind(broker_order_id)
        .bind(order_id.to_string())
        .bind(OrderStatus::Pending.id())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.order(order_id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::OrderNotFound(order_id.to_string())),
        }
    }

    async fn apply_settlement(&self, s: &Settlement) -> Result<SettleOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders_tb
            SET status = $1, filled_qty = $2, filled_avg_price = $3, locked_amount = $4,
                reserved_qty = $5, failure_reason = COALESCE($6, failure_reason), updated_at = NOW()
            WHERE order_id = $7 AND status = $8 AND filled_qty = $9
            "#,
        )
        .bind(s.new_status.id())
        .bind(s.filled_qty)
        .bind(s.filled_avg_price)
        .bind(s.locked_amount)
        .bind(s.reserved_qty)
        .bind(&s.failure_reason)
        .bind(s.order_id.to_string())
        .bind(s.expected_status.id())
        .bind(s.expected_filled_qty)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return match self.order(s.order_id).await? {
                Some(_) => Ok(SettleOutcome::Conflict),
                None => Err(StoreError::OrderNotFound(s.order_id.to_string())),
            };
        }

        let mut receipt = SettlementReceipt::default();
        if s.delta != LedgerDelta::None {
            let mut wallet = Self::wallet_for_update(&mut tx, s.user_id, &s.currency).await?;
            let mut holding = Self::holding_for_update(&mut tx, s.user_id, &s.symbol).await?;
            receipt = apply_delta(&mut wallet, &mut holding, &s.delta)?;
            Self::save_wallet(&mut tx, &wallet).await?;
            if matches!(s.delta, LedgerDelta::Buy { .. } | LedgerDelta::Sell { .. }) {
                Self::save_holding(&mut tx, &holding).await?;
            }
        }

        if receipt.cash_shortfall > Decimal::ZERO {
            sqlx::query("UPDATE orders_tb SET shortfall = shortfall + $1 WHERE order_id = $2")
                .bind(receipt.cash_shortfall)
                .bind(s.order_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(SettleOutcome::Applied(receipt))
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM orders_tb WHERE order_id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn order_by_broker_id(&self, broker_order_id: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM orders_tb WHERE broker_order_id = $1",
            ORDER_COLUMNS
        ))
        .bind(broker_order_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_orders(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
        limit: u32,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM orders_tb
            WHERE user_id = $1 AND ($2::SMALLINT IS NULL OR status = $2)
            ORDER BY created_at DESC, order_id DESC
            LIMIT $3
            "#,
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .bind(status.map(|s| s.id()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }
}
