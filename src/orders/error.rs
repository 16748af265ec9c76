//! Settlement error taxonomy
//!
//! Every failure surfaced by the settlement engine maps to a stable code and
//! an HTTP status for API responses.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::broker::BrokerError;
use crate::ledger::{LedgerError, StoreError};

#[derive(Error, Debug, Clone)]
pub enum SettlementError {
    // === Validation Errors ===
    #[error("Invalid request: {0}")]
    Validation(String),

    // === Business Rule Violations ===
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    #[error("Insufficient shares: available {available}, required {required}")]
    InsufficientShares {
        available: Decimal,
        required: Decimal,
    },

    #[error("Account is not active")]
    AccountInactive,

    // === Ownership / Existence ===
    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Order belongs to another user")]
    Forbidden,

    #[error("Order cannot be canceled in status {0}")]
    OrderNotCancelable(String),

    // === Broker ===
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Broker rejected order: {0}")]
    BrokerRejected(String),

    // === System Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::Validation(_) => "VALIDATION_ERROR",
            SettlementError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            SettlementError::InsufficientShares { .. } => "INSUFFICIENT_SHARES",
            SettlementError::AccountInactive => "ACCOUNT_INACTIVE",
            SettlementError::NotFound(_) => "NOT_FOUND",
            SettlementError::Forbidden => "FORBIDDEN",
            SettlementError::OrderNotCancelable(_) => "ORDER_NOT_CANCELABLE",
            SettlementError::BrokerUnavailable(_) => "BROKER_UNAVAILABLE",
            SettlementError::BrokerRejected(_) => "BROKER_REJECTED",
            SettlementError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            SettlementError::Validation(_) => 400,
            SettlementError::InsufficientFunds { .. } => 402,
            SettlementError::AccountInactive | SettlementError::Forbidden => 403,
            SettlementError::NotFound(_) => 404,
            SettlementError::OrderNotCancelable(_) => 409,
            SettlementError::InsufficientShares { .. } => 422,
            SettlementError::Internal(_) => 500,
            SettlementError::BrokerRejected(_) => 502,
            SettlementError::BrokerUnavailable(_) => 503,
        }
    }

    /// Transient failures the caller may retry as a whole.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SettlementError::BrokerUnavailable(_))
    }
}

impl From<StoreError> for SettlementError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Ledger(LedgerError::InsufficientFunds {
                available,
                requested,
            }) => SettlementError::InsufficientFunds {
                available,
                required: requested,
            },
            StoreError::Ledger(LedgerError::InsufficientShares { held, requested }) => {
                SettlementError::InsufficientShares {
                    available: held,
                    required: requested,
                }
            }
            StoreError::OrderNotFound(id) => SettlementError::NotFound(id),
            other => SettlementError::Internal(other.to_string()),
        }
    }
}

impl From<BrokerError> for SettlementError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::Rejected { .. } => SettlementError::BrokerRejected(e.to_string()),
            BrokerError::NotFound(_) => SettlementError::NotFound(e.to_string()),
            _ => SettlementError::BrokerUnavailable(e.to_string()),
        }
    }
}
