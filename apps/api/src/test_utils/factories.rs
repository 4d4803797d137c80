//! Test data factories for creating valid test fixtures.
//!
//! Each factory function creates a complete, valid object with sensible defaults.
//! Use the closure parameter to override specific fields as needed.

use chrono::{DateTime, Utc};

use crate::{
    application::{
        ports::payment_provider::{CustomerId, InvoiceSnapshot, SubscriptionId, SubscriptionSnapshot},
        use_cases::billing_writer::UserBillingProfile,
    },
    domain::entities::{
        billing_record::BillingRecord, invoice_status::InvoiceStatus,
        price_tier_table::PriceTierTable, subscription_status::SubscriptionStatus,
    },
};

/// Premium prices known to [`test_price_table`]; any other id is standard.
pub const TEST_PREMIUM_PRICES: [&str; 2] = ["price_premium_monthly", "price_premium_annual"];

pub fn test_price_table() -> PriceTierTable {
    PriceTierTable::new(TEST_PREMIUM_PRICES.iter().map(|p| p.to_string()))
}

/// 2026-01-01T00:00:00Z
pub fn test_period_end() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_767_225_600, 0).unwrap_or_default()
}

/// Signed-up user with no billing history.
pub fn create_test_profile(overrides: impl FnOnce(&mut UserBillingProfile)) -> UserBillingProfile {
    let mut profile = UserBillingProfile {
        user_id: "user_1".to_string(),
        email: Some("user@example.com".to_string()),
        billing: BillingRecord::default(),
    };
    overrides(&mut profile);
    profile
}

/// Active standard subscription for `cus_1`.
pub fn create_test_subscription(
    overrides: impl FnOnce(&mut SubscriptionSnapshot),
) -> SubscriptionSnapshot {
    let mut subscription = SubscriptionSnapshot {
        subscription_id: SubscriptionId::new("sub_1"),
        customer_id: CustomerId::new("cus_1"),
        status: SubscriptionStatus::Active,
        price_ids: vec!["price_standard_monthly".to_string()],
        current_period_end: Some(test_period_end()),
        cancel_at_period_end: false,
    };
    overrides(&mut subscription);
    subscription
}

/// Paid invoice for `cus_1`.
pub fn create_test_invoice(overrides: impl FnOnce(&mut InvoiceSnapshot)) -> InvoiceSnapshot {
    let mut invoice = InvoiceSnapshot {
        invoice_id: "in_1".to_string(),
        customer_id: CustomerId::new("cus_1"),
        status: InvoiceStatus::Paid,
        amount_due_cents: 0,
    };
    overrides(&mut invoice);
    invoice
}
