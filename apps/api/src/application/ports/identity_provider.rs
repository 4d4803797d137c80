use async_trait::async_trait;
use tally_types::BillingMetadata;

use crate::app_error::AppResult;

/// Per-user metadata held by the identity/session provider.
///
/// This is the fast-path cache every authorization check reads. Writes must
/// merge into the existing metadata; other subsystems own the remaining keys.
#[async_trait]
pub trait IdentityProviderPort: Send + Sync {
    /// Merge the billing fields into the user's public metadata.
    async fn merge_billing_metadata(
        &self,
        user_id: &str,
        metadata: &BillingMetadata,
    ) -> AppResult<()>;
}
