use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};
use tally_types::BillingStatus;

/// Subscription status as reported by the payment provider.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
    /// A status this service does not know about yet
    Unknown,
}

impl SubscriptionStatus {
    /// Convert from Stripe subscription status string
    pub fn from_stripe(s: &str) -> Self {
        s.parse().unwrap_or(SubscriptionStatus::Unknown)
    }

    /// Map to the reconciled billing status.
    ///
    /// Anything that is not active, trialing or past due collapses to
    /// canceled so an unfamiliar status never grants access.
    pub fn to_billing_status(&self) -> BillingStatus {
        match self {
            SubscriptionStatus::Active => BillingStatus::Active,
            SubscriptionStatus::Trialing => BillingStatus::Trialing,
            SubscriptionStatus::PastDue => BillingStatus::PastDue,
            SubscriptionStatus::Canceled | SubscriptionStatus::Unpaid => BillingStatus::Canceled,
            SubscriptionStatus::Incomplete
            | SubscriptionStatus::IncompleteExpired
            | SubscriptionStatus::Paused
            | SubscriptionStatus::Unknown => BillingStatus::Canceled,
        }
    }
}
