use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    app_error::AppResult,
    domain::entities::{invoice_status::InvoiceStatus, subscription_status::SubscriptionStatus},
};

// ============================================================================
// Port Types - Provider-agnostic domain types
// ============================================================================

/// Unique identifier for a customer in a payment provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

impl CustomerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a subscription in a payment provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription state read from the payment provider. Never mutated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionSnapshot {
    pub subscription_id: SubscriptionId,
    pub customer_id: CustomerId,
    pub status: SubscriptionStatus,
    /// Price id of every line item, in provider order
    pub price_ids: Vec<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

impl SubscriptionSnapshot {
    /// Price of the first line item. Multi-item subscriptions are classified
    /// by their primary item only.
    pub fn primary_price_id(&self) -> Option<&str> {
        self.price_ids.first().map(String::as_str)
    }
}

/// Invoice state read from the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceSnapshot {
    pub invoice_id: String,
    pub customer_id: CustomerId,
    pub status: InvoiceStatus,
    pub amount_due_cents: i64,
}

// ============================================================================
// Payment Provider Port
// ============================================================================

/// Read-side view of the payment provider used by billing reconciliation.
///
/// Lookups return `Ok(None)` (or an empty list) when the resource does not
/// exist. `Err` is reserved for transient failures the caller should surface.
#[async_trait]
pub trait PaymentProviderPort: Send + Sync {
    /// Fetch a subscription by id, whatever its status.
    async fn get_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<SubscriptionSnapshot>>;

    /// List a customer's subscriptions in the given status, in provider order.
    async fn list_subscriptions(
        &self,
        customer_id: &CustomerId,
        status: SubscriptionStatus,
        limit: u32,
    ) -> AppResult<Vec<SubscriptionSnapshot>>;

    /// Find the customer registered with this email address.
    async fn find_customer_by_email(&self, email: &str) -> AppResult<Option<CustomerId>>;

    /// Recent invoices for a customer, newest first.
    async fn list_invoices(&self, customer_id: &CustomerId) -> AppResult<Vec<InvoiceSnapshot>>;

    /// Create a hosted billing portal session and return its URL.
    async fn create_portal_session(
        &self,
        customer_id: &CustomerId,
        return_url: &str,
    ) -> AppResult<String>;
}
