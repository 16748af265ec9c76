//! Ledger: wallets, holdings and the order book of record
//!
//! - [`models`]: `Wallet` / `Holding` with enforced invariants
//! - [`store`]: `LedgerStore` trait and the settlement unit it applies
//! - [`memory`]: single-mutex in-process store
//! - [`postgres`]: PostgreSQL store with conditional updates

pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::MemoryLedgerStore;
pub use models::{Holding, LedgerError, Wallet};
pub use postgres::PgLedgerStore;
pub use store::{
    LedgerDelta, LedgerStore, SettleOutcome, Settlement, SettlementReceipt, StoreError,
};
