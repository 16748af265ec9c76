//! Gateway types module
//!
//! - [`ApiResponse<T>`]: Unified API response wrapper
//! - [`ApiError`] / [`ApiResult<T>`]: handler error path
//! - request/response DTOs that are not domain types

pub mod dto;
pub mod response;

pub use dto::{HealthResponse, ListOrdersQuery, MockDepositRequest, WalletData, WebhookAck};
pub use response::{ApiError, ApiResponse, ApiResult, created, error_codes, ok};
