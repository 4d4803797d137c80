use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;

use crate::app_error::{AppError, AppResult};

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Maximum age of a signed webhook payload.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: SecretString,
    api_base: String,
}

impl StripeClient {
    pub fn new(client: Client, secret_key: SecretString) -> Self {
        Self {
            client,
            secret_key,
            api_base: STRIPE_API_BASE.to_string(),
        }
    }

    /// Point the client at another host (local stripe-mock, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn auth_header(&self) -> String {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:", self.secret_key.expose_secret()));
        format!("Basic {}", encoded)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.api_base, path))
            .header("Authorization", self.auth_header())
    }

    // ========================================================================
    // Customers
    // ========================================================================

    pub async fn find_customer_by_email(&self, email: &str) -> AppResult<Option<StripeCustomer>> {
        let list: StripeList<StripeCustomer> = self
            .send(self.get("/customers").query(&[("email", email), ("limit", "1")]))
            .await?;
        Ok(list.data.into_iter().find(|c| !c.deleted))
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// `Ok(None)` when Stripe reports the subscription does not exist.
    pub async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> AppResult<Option<StripeSubscription>> {
        match self
            .send(self.get(&format!("/subscriptions/{}", subscription_id)))
            .await
        {
            Ok(sub) => Ok(Some(sub)),
            Err(AppError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn list_subscriptions(
        &self,
        customer_id: &str,
        status: &str,
        limit: u32,
    ) -> AppResult<StripeList<StripeSubscription>> {
        let limit = limit.to_string();
        self.send(self.get("/subscriptions").query(&[
            ("customer", customer_id),
            ("status", status),
            ("limit", limit.as_str()),
        ]))
        .await
    }

    // ========================================================================
    // Invoices
    // ========================================================================

    pub async fn list_invoices(
        &self,
        customer_id: &str,
        limit: u32,
    ) -> AppResult<Vec<StripeInvoice>> {
        let limit = limit.to_string();
        let list: StripeList<StripeInvoice> = self
            .send(
                self.get("/invoices")
                    .query(&[("customer", customer_id), ("limit", limit.as_str())]),
            )
            .await?;
        Ok(list.data)
    }

    // ========================================================================
    // Customer Portal
    // ========================================================================

    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> AppResult<StripePortalSession> {
        let params = [("customer", customer_id), ("return_url", return_url)];
        let request = self
            .client
            .post(format!("{}/billing_portal/sessions", self.api_base))
            .header("Authorization", self.auth_header())
            .form(&params);
        self.send(request).await
    }

    // ========================================================================
    // Webhook Signature Verification
    // ========================================================================

    pub fn verify_webhook_signature(
        payload: &[u8],
        signature_header: &str,
        webhook_secret: &str,
    ) -> AppResult<()> {
        Self::verify_webhook_signature_at(
            payload,
            signature_header,
            webhook_secret,
            chrono::Utc::now().timestamp(),
        )
    }

    pub fn verify_webhook_signature_at(
        payload: &[u8],
        signature_header: &str,
        webhook_secret: &str,
        now: i64,
    ) -> AppResult<()> {
        // Header format: "t=timestamp,v1=signature,v0=..."
        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = Some(value),
                "v1" => signatures.push(value),
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| AppError::InvalidInput("Missing timestamp in signature".into()))?;
        if signatures.is_empty() {
            return Err(AppError::InvalidInput("Missing signature".into()));
        }

        let expected = sign_payload(payload, timestamp, webhook_secret)?;

        if !signatures
            .iter()
            .any(|sig| constant_time_compare(sig, &expected))
        {
            return Err(AppError::InvalidInput("Invalid signature".into()));
        }

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| AppError::InvalidInput("Invalid timestamp".into()))?;
        if (now - ts).abs() > WEBHOOK_TOLERANCE_SECS {
            return Err(AppError::InvalidInput("Timestamp outside tolerance".into()));
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn send<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> AppResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("Stripe request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(map_error_response(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse Stripe response");
            AppError::PaymentProvider(format!("Failed to parse Stripe response: {}", e))
        })
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`, the scheme Stripe signs with.
pub fn sign_payload(payload: &[u8], timestamp: &str, secret: &str) -> AppResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("HMAC error".into()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// 404 and `resource_missing` become `NotFound`. Rate limits, auth problems
/// and server errors are provider failures. Anything else is a bad request.
fn map_error_response(status: StatusCode, body: &str) -> AppError {
    let parsed = serde_json::from_str::<StripeErrorResponse>(body).ok();
    let code = parsed.as_ref().and_then(|e| e.error.code.as_deref());
    let message = parsed
        .as_ref()
        .and_then(|e| e.error.message.clone())
        .unwrap_or_else(|| status.to_string());

    if status == StatusCode::NOT_FOUND || code == Some("resource_missing") {
        tracing::debug!(status = %status, "Stripe resource not found");
        return AppError::NotFound;
    }

    tracing::error!(status = %status, code = ?code, message = %message, "Stripe API error");

    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || status.is_server_error()
    {
        AppError::PaymentProvider(format!("Stripe API error {}: {}", status, message))
    } else {
        AppError::InvalidInput(format!("Stripe error: {}", message))
    }
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

// ============================================================================
// Stripe Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct StripePortalSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    /// Older API versions put the period on the subscription, newer ones on
    /// each item
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub items: StripeSubscriptionItems,
}

impl StripeSubscription {
    pub fn price_ids(&self) -> Vec<String> {
        self.items
            .data
            .iter()
            .map(|item| item.price.id.clone())
            .collect()
    }

    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end.or_else(|| {
            self.items
                .data
                .first()
                .and_then(|item| item.current_period_end)
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItems {
    pub data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    pub price: StripePrice,
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub customer: Option<String>,
    #[serde(default)]
    pub amount_due: i64,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeErrorResponse {
    pub error: StripeError,
}

#[derive(Debug, Deserialize)]
pub struct StripeError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: Option<String>,
    pub code: Option<String>,
}

// ============================================================================
// Webhook Event Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeWebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEventData {
    pub object: serde_json::Value,
}

impl StripeWebhookEvent {
    pub fn get_subscription(&self) -> Option<StripeSubscription> {
        serde_json::from_value(self.data.object.clone()).ok()
    }

    pub fn get_invoice(&self) -> Option<StripeInvoice> {
        serde_json::from_value(self.data.object.clone()).ok()
    }
}
