//! Stripe webhook handler.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use secrecy::ExposeSecret;
use tracing::{error, info, warn};

use crate::{
    adapters::http::app_state::AppState,
    app_error::{AppError, AppResult},
    application::use_cases::billing_sync::SyncOutcome,
    infra::{
        stripe_client::{StripeClient, StripeWebhookEvent},
        stripe_payment_adapter::StripePaymentAdapter,
    },
};

const SUBSCRIPTION_EVENTS: &[&str] = &[
    "customer.subscription.created",
    "customer.subscription.updated",
    "customer.subscription.deleted",
    "customer.subscription.paused",
    "customer.subscription.resumed",
];

const INVOICE_EVENTS: &[&str] = &[
    "invoice.payment_failed",
    "invoice.paid",
    "invoice.payment_succeeded",
    "invoice.marked_uncollectible",
    "invoice.voided",
];

// ============================================================================
// Helper Functions
// ============================================================================

/// Determines if a webhook processing error should trigger a Stripe retry.
///
/// Returns `true` if the error is retryable (transient), meaning we should
/// return 5xx to Stripe so they retry the webhook.
///
/// Returns `false` if the error is non-retryable (expected condition like
/// customer not found), meaning we should return 2xx and log.
fn is_retryable_error(error: &AppError) -> bool {
    match error {
        // Transient errors - retry may succeed
        AppError::Database(_) => true,
        AppError::Internal(_) => true,
        AppError::RateLimited => true,
        AppError::PaymentProvider(_) => true,
        AppError::IdentityProvider(_) => true,

        // Expected conditions - won't change with retry
        AppError::NotFound => false,
        AppError::InvalidInput(_) => false,
        AppError::InvalidCredentials => false,
    }
}

/// Returns 500 Internal Server Error for Stripe to retry the webhook.
fn webhook_retryable_error(error: &AppError, event_type: &str, event_id: &str) -> StatusCode {
    error!(
        error = %error,
        event_type,
        event_id,
        retryable = true,
        "Webhook processing failed, returning 500 for Stripe retry"
    );
    StatusCode::INTERNAL_SERVER_ERROR
}

fn log_outcome(outcome: &Option<SyncOutcome>, event_type: &str, event_id: &str) {
    match outcome {
        Some(outcome) => info!(
            event_type,
            event_id,
            method = ?outcome.method,
            tier = %outcome.resolved.tier,
            billing_status = %outcome.resolved.billing_status,
            cache_updated = outcome.write.cache_updated,
            "Webhook applied"
        ),
        None => info!(event_type, event_id, "Webhook for unknown customer ignored"),
    }
}

// ============================================================================
// Handler
// ============================================================================

/// POST /api/billing/webhook
///
/// Signature problems are 400. Processing errors are 500 when a retry could
/// succeed and 200 otherwise, so Stripe stops redelivering hopeless events.
pub async fn handle_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    let Some(webhook_secret) = app_state.config.stripe_webhook_secret.as_ref() else {
        // 5xx keeps Stripe redelivering until the secret is configured.
        return Err(AppError::Internal("Stripe webhook secret not configured".into()));
    };

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidInput("Missing Stripe signature".into()))?;

    StripeClient::verify_webhook_signature(&body, signature, webhook_secret.expose_secret())?;

    let event: StripeWebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidInput(format!("Invalid webhook payload: {}", e)))?;
    let event_type = event.event_type.as_str();
    let event_id = event.id.as_str();

    let result = if SUBSCRIPTION_EVENTS.contains(&event_type) {
        handle_subscription_event(&app_state, &event).await
    } else if INVOICE_EVENTS.contains(&event_type) {
        handle_invoice_event(&app_state, &event).await
    } else {
        tracing::debug!(event_type, event_id, "Ignoring unhandled webhook event");
        return Ok(StatusCode::OK);
    };

    match result {
        Ok(outcome) => {
            log_outcome(&outcome, event_type, event_id);
            Ok(StatusCode::OK)
        }
        Err(e) if is_retryable_error(&e) => Ok(webhook_retryable_error(&e, event_type, event_id)),
        Err(e) => {
            warn!(
                error = %e,
                event_type,
                event_id,
                retryable = false,
                "Webhook processing failed, acknowledging"
            );
            Ok(StatusCode::OK)
        }
    }
}

async fn handle_subscription_event(
    app_state: &AppState,
    event: &StripeWebhookEvent,
) -> AppResult<Option<SyncOutcome>> {
    let subscription = event
        .get_subscription()
        .ok_or(AppError::InvalidInput("Malformed subscription object".into()))?;
    let snapshot = StripePaymentAdapter::subscription_snapshot(&subscription);

    app_state
        .billing_sync_use_cases
        .sync_subscription_event(&snapshot)
        .await
}

async fn handle_invoice_event(
    app_state: &AppState,
    event: &StripeWebhookEvent,
) -> AppResult<Option<SyncOutcome>> {
    let invoice = event
        .get_invoice()
        .ok_or(AppError::InvalidInput("Malformed invoice object".into()))?;
    let Some(customer_id) = invoice.customer else {
        warn!(invoice_id = %invoice.id, "Invoice without customer, nothing to sync");
        return Ok(None);
    };

    app_state
        .billing_sync_use_cases
        .sync_customer(&customer_id)
        .await
}
