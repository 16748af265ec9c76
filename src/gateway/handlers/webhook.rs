//! Broker order notification webhook
//!
//! Always acknowledges with 200 once the caller is authenticated: the broker
//! retries non-2xx responses indefinitely and its retry policy is not ours.
//! Malformed payloads, unknown orders and settlement failures are logged.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, WebhookAck, ok};
use super::helpers::{WEBHOOK_SECRET_HEADER, secret_matches};
use crate::orders::{BrokerNotification, ReconcileOutcome};

/// Broker order event
///
/// POST /webhooks/broker/orders
#[utoipa::path(
    post,
    path = "/webhooks/broker/orders",
    request_body = BrokerNotification,
    responses(
        (status = 200, description = "Notification received", body = WebhookAck),
        (status = 401, description = "Webhook secret mismatch")
    ),
    security(("webhook_secret" = [])),
    tag = "Webhooks"
)]
pub async fn broker_order_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookAck> {
    if let Some(secret) = &state.settlement.webhook_secret {
        if !secret_matches(&headers, WEBHOOK_SECRET_HEADER, secret) {
            tracing::warn!("Webhook rejected: secret mismatch");
            return ApiError::new(
                StatusCode::UNAUTHORIZED,
                super::super::types::error_codes::AUTH_FAILED,
                "Invalid webhook secret",
            )
            .into_err();
        }
    }

    let notification: BrokerNotification = match serde_json::from_slice(&body) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, bytes = body.len(), "Malformed broker notification");
            return ok(WebhookAck {
                outcome: "invalid".to_string(),
                detail: Some(e.to_string()),
            });
        }
    };

    tracing::debug!(
        broker_order_id = %notification.order_id,
        event = ?notification.event,
        filled_qty = %notification.filled_qty,
        "Broker notification received"
    );

    let ack = match state.engine.reconcile_fill(&notification).await {
        Ok(ReconcileOutcome::Applied { status, .. }) => WebhookAck {
            outcome: "applied".to_string(),
            detail: Some(status.to_string()),
        },
        Ok(ReconcileOutcome::Ignored(skip)) => WebhookAck {
            outcome: "ignored".to_string(),
            detail: Some(skip.to_string()),
        },
        Ok(ReconcileOutcome::Unknown) => WebhookAck {
            outcome: "unknown_order".to_string(),
            detail: None,
        },
        Err(e) => {
            tracing::error!(
                broker_order_id = %notification.order_id,
                error = %e,
                code = e.code(),
                "Reconciliation failed"
            );
            WebhookAck {
                outcome: "error".to_string(),
                detail: None,
            }
        }
    };
    ok(ack)
}
