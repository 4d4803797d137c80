//! Maps a payment provider snapshot to the canonical billing tuple.
//!
//! Everything here is pure: the same subscription, invoices and price table
//! always produce the same `ResolvedBilling`. That determinism is what lets
//! racing writers (webhook, app load, operator) converge without locking.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_types::{BillingStatus, Plan, Tier};

use crate::{
    application::ports::payment_provider::{
        CustomerId, InvoiceSnapshot, SubscriptionId, SubscriptionSnapshot,
    },
    domain::entities::price_tier_table::PriceTierTable,
};

/// Canonical billing tuple derived from one subscription snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedBilling {
    pub plan: Plan,
    pub billing_status: BillingStatus,
    pub tier: Tier,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub subscription_id: Option<SubscriptionId>,
    pub customer_id: Option<CustomerId>,
    pub has_unpaid_invoice: bool,
}

impl ResolvedBilling {
    /// No subscription anywhere: free tier, nothing to bill.
    pub fn no_subscription() -> Self {
        Self {
            plan: Plan::None,
            billing_status: BillingStatus::None,
            tier: Tier::Free,
            current_period_end: None,
            cancel_at_period_end: false,
            subscription_id: None,
            customer_id: None,
            has_unpaid_invoice: false,
        }
    }
}

pub fn has_unpaid_invoice(invoices: &[InvoiceSnapshot]) -> bool {
    invoices.iter().any(|invoice| invoice.status.is_unpaid())
}

/// Derive plan, billing status and tier.
///
/// Tier rules, in order:
/// 1. Any open or uncollectible invoice: free and past due, whatever the
///    subscription status says.
/// 2. Active or trialing: the plan's tier.
/// 3. Anything else: free.
///
/// The plan is always recorded from the price, even when access is revoked,
/// so a canceled premium subscriber still shows `premium` for audit.
pub fn resolve(
    subscription: Option<&SubscriptionSnapshot>,
    invoices: &[InvoiceSnapshot],
    price_table: &PriceTierTable,
) -> ResolvedBilling {
    let Some(subscription) = subscription else {
        return ResolvedBilling::no_subscription();
    };

    let plan = price_table.classify(subscription.primary_price_id());
    let unpaid = has_unpaid_invoice(invoices);

    let (billing_status, tier) = if unpaid {
        (BillingStatus::PastDue, Tier::Free)
    } else {
        let status = subscription.status.to_billing_status();
        let tier = if status.grants_access() {
            plan.tier()
        } else {
            Tier::Free
        };
        (status, tier)
    };

    ResolvedBilling {
        plan,
        billing_status,
        tier,
        current_period_end: subscription.current_period_end,
        cancel_at_period_end: subscription.cancel_at_period_end,
        subscription_id: Some(subscription.subscription_id.clone()),
        customer_id: Some(subscription.customer_id.clone()),
        has_unpaid_invoice: unpaid,
    }
}
