use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tally_types::{BillingMetadata, BillingStatus, Plan, Tier};

use crate::{
    app_error::{AppError, AppResult},
    application::ports::identity_provider::IdentityProviderPort,
    domain::entities::billing_record::{BillingRecord, SyncReasonCode},
};

use super::tier_resolver::ResolvedBilling;

// ============================================================================
// Profile Types
// ============================================================================

/// A user row as seen by billing: identity plus the billing columns.
#[derive(Debug, Clone, Default)]
pub struct UserBillingProfile {
    pub user_id: String,
    pub email: Option<String>,
    pub billing: BillingRecord,
}

/// Field-level update of the billing columns.
///
/// `stripe_subscription_id: None` clears the stored subscription.
/// `stripe_customer_id: None` keeps whatever customer id is already stored,
/// since a customer outlives its subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingUpdate {
    pub plan: Plan,
    pub billing_status: BillingStatus,
    pub tier: Tier,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub sync_reason: Option<SyncReasonCode>,
}

impl BillingUpdate {
    pub fn from_resolved(resolved: &ResolvedBilling, sync_reason: Option<SyncReasonCode>) -> Self {
        Self {
            plan: resolved.plan,
            billing_status: resolved.billing_status,
            tier: resolved.tier,
            current_period_end: resolved.current_period_end,
            cancel_at_period_end: resolved.cancel_at_period_end,
            stripe_subscription_id: resolved
                .subscription_id
                .as_ref()
                .map(|id| id.as_str().to_string()),
            stripe_customer_id: resolved
                .customer_id
                .as_ref()
                .map(|id| id.as_str().to_string()),
            sync_reason,
        }
    }

    /// Metadata mirrored into the identity provider.
    ///
    /// `stored_customer_id` is what the durable store holds after applying
    /// this update, so both stores carry the same customer.
    pub fn to_metadata(&self, stored_customer_id: Option<&str>) -> BillingMetadata {
        BillingMetadata {
            tier: self.tier,
            billing_status: self.billing_status,
            period_end: self.current_period_end.map(|dt| dt.timestamp()),
            cancel_at_period_end: self.cancel_at_period_end,
            subscription_id: self.stripe_subscription_id.clone(),
            customer_id: stored_customer_id.map(String::from),
        }
    }
}

// ============================================================================
// Repository Trait
// ============================================================================

#[async_trait]
pub trait UserBillingRepo: Send + Sync {
    async fn get_by_user_id(&self, user_id: &str) -> AppResult<Option<UserBillingProfile>>;
    async fn get_by_email(&self, email: &str) -> AppResult<Option<UserBillingProfile>>;
    async fn get_by_customer_id(&self, customer_id: &str)
    -> AppResult<Option<UserBillingProfile>>;
    /// Write the billing columns only and return the customer id stored
    /// afterwards. `AppError::NotFound` if no such user.
    async fn apply_billing_update(
        &self,
        user_id: &str,
        update: &BillingUpdate,
    ) -> AppResult<Option<String>>;
    async fn set_customer_id(&self, user_id: &str, customer_id: &str) -> AppResult<()>;
}

// ============================================================================
// Writer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub durable_updated: bool,
    pub cache_updated: bool,
}

/// Applies one resolved tuple to the durable store, then the cache.
///
/// The durable write is authoritative and its failure is returned; it is
/// bounded by `durable_timeout`. The cache write is best-effort: it is
/// bounded by `cache_timeout` and a failure only shows up as
/// `cache_updated = false`. Nothing is rolled back; the next reconciliation
/// writes the same tuple again.
#[derive(Clone)]
pub struct BillingWriter {
    repo: Arc<dyn UserBillingRepo>,
    identity: Arc<dyn IdentityProviderPort>,
    durable_timeout: Duration,
    cache_timeout: Duration,
}

fn durable_timed_out(limit: Duration) -> AppError {
    AppError::Database(format!(
        "durable write timed out after {}ms",
        limit.as_millis()
    ))
}

impl BillingWriter {
    pub fn new(
        repo: Arc<dyn UserBillingRepo>,
        identity: Arc<dyn IdentityProviderPort>,
        durable_timeout: Duration,
        cache_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            identity,
            durable_timeout,
            cache_timeout,
        }
    }

    /// Persist a customer id discovered by email, under the durable deadline.
    pub async fn remember_customer(&self, user_id: &str, customer_id: &str) -> AppResult<()> {
        tokio::time::timeout(
            self.durable_timeout,
            self.repo.set_customer_id(user_id, customer_id),
        )
        .await
        .unwrap_or_else(|_| Err(durable_timed_out(self.durable_timeout)))
    }

    pub async fn write(
        &self,
        profile: &UserBillingProfile,
        update: &BillingUpdate,
    ) -> AppResult<WriteReport> {
        let user_id = profile.user_id.as_str();

        let stored_customer_id = tokio::time::timeout(
            self.durable_timeout,
            self.repo.apply_billing_update(user_id, update),
        )
        .await
        .unwrap_or_else(|_| Err(durable_timed_out(self.durable_timeout)))
        .inspect_err(|e| {
            tracing::error!(
                user_id = %user_id,
                tier = %update.tier,
                billing_status = %update.billing_status,
                error = %e,
                "Durable billing write failed"
            );
        })?;

        let metadata = update.to_metadata(stored_customer_id.as_deref());
        let cache_updated = self.write_cache(user_id, &metadata).await;

        tracing::info!(
            user_id = %user_id,
            tier = %update.tier,
            billing_status = %update.billing_status,
            plan = %update.plan,
            cache_updated,
            "Billing record written"
        );

        Ok(WriteReport {
            durable_updated: true,
            cache_updated,
        })
    }

    async fn write_cache(&self, user_id: &str, metadata: &BillingMetadata) -> bool {
        let result = tokio::time::timeout(
            self.cache_timeout,
            self.identity.merge_billing_metadata(user_id, metadata),
        )
        .await
        .unwrap_or_else(|_| {
            Err(AppError::IdentityProvider(format!(
                "metadata merge timed out after {}ms",
                self.cache_timeout.as_millis()
            )))
        });

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    tier = %metadata.tier,
                    billing_status = %metadata.billing_status,
                    error = %e,
                    "Identity metadata write failed, durable record kept"
                );
                false
            }
        }
    }
}
