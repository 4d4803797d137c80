use serde::{Deserialize, Serialize};

use crate::tier::BillingStatus;

/// Which lookup strategy located the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMethod {
    SubscriptionId,
    CustomerId,
    CustomerIdTrialing,
    EmailLookup,
    EmailLookupTrialing,
    /// Subscription object delivered by a payment provider webhook
    Webhook,
}

impl SyncMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubscriptionId => "subscription_id",
            Self::CustomerId => "customer_id",
            Self::CustomerIdTrialing => "customer_id_trialing",
            Self::EmailLookup => "email_lookup",
            Self::EmailLookupTrialing => "email_lookup_trialing",
            Self::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a sync did not find a subscription to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    NoUser,
    NoSubscriptionFound,
}

impl SyncReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoUser => "no_user",
            Self::NoSubscriptionFound => "no_subscription_found",
        }
    }
}

impl std::fmt::Display for SyncReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of the on-demand billing sync endpoint called at app launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub synced: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<SyncMethod>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BillingStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<SyncReason>,
}

impl SyncResponse {
    pub fn synced(method: SyncMethod, status: BillingStatus) -> Self {
        Self {
            synced: true,
            method: Some(method),
            status: Some(status),
            reason: None,
        }
    }

    pub fn not_synced(reason: SyncReason) -> Self {
        Self {
            synced: false,
            method: None,
            status: None,
            reason: Some(reason),
        }
    }
}
