use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tally_types::{BillingStatus, Plan, Tier};

/// Audit reason written by operator-initiated syncs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SyncReasonCode {
    /// The user was downgraded because an invoice is open or uncollectible
    UnpaidInvoices,
    /// An operator re-derived the record from the payment provider
    ManualSync,
}

/// Billing fields stored on the user document.
///
/// Plan and billing status always come from the same subscription snapshot,
/// and tier is derived from both (see `is_consistent`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct BillingRecord {
    pub plan: Plan,
    pub billing_status: BillingStatus,
    pub tier: Tier,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub sync_reason: Option<SyncReasonCode>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BillingRecord {
    /// Tier equals the plan's tier exactly when the status grants access.
    pub fn is_consistent(&self) -> bool {
        if self.billing_status.grants_access() {
            self.tier == self.plan.tier()
        } else {
            self.tier == Tier::Free
        }
    }
}
