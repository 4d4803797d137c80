use serde::{Deserialize, Serialize};

use crate::tier::{BillingStatus, Tier};

/// Billing fields mirrored into the identity provider's per-user public
/// metadata. Authorization checks read these without a database round trip.
///
/// Only these keys are owned by the billing service. Every other key in the
/// metadata bag belongs to someone else and must survive a write untouched,
/// so `None` values serialize as `null` (the merge endpoint clears the key)
/// instead of being skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BillingMetadata {
    pub tier: Tier,
    pub billing_status: BillingStatus,
    /// Unix timestamp when the current billing period ends
    pub period_end: Option<i64>,
    pub cancel_at_period_end: bool,
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
}

impl BillingMetadata {
    /// Extract the billing fields from a loosely-typed metadata bag.
    ///
    /// Unknown keys are ignored. A bag that cannot be read at all yields the
    /// free/none defaults.
    pub fn from_public_metadata(metadata: &serde_json::Value) -> Self {
        serde_json::from_value(metadata.clone()).unwrap_or_default()
    }

    /// The billing fields as a JSON object, ready to be merged into an
    /// existing metadata bag.
    pub fn to_json_object(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    /// Tier to enforce. A cached paid tier without an access-granting status
    /// is treated as free.
    pub fn effective_tier(&self) -> Tier {
        if self.billing_status.grants_access() {
            self.tier
        } else {
            Tier::Free
        }
    }
}
