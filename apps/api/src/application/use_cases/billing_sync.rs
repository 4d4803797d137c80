use serde::Serialize;
use std::sync::Arc;
use strum::{AsRefStr, Display};
use tally_types::{BillingStatus, Plan, SyncMethod, SyncReason, SyncResponse, Tier};
use tracing::instrument;

use crate::{
    app_error::{AppError, AppResult},
    application::validators,
    application::ports::payment_provider::{
        CustomerId, InvoiceSnapshot, PaymentProviderPort, SubscriptionSnapshot,
    },
    domain::entities::{billing_record::SyncReasonCode, price_tier_table::PriceTierTable},
};

use super::{
    billing_writer::{BillingUpdate, BillingWriter, UserBillingProfile, UserBillingRepo, WriteReport},
    subscription_lookup::{self, LookupContext, LookupOutcome, SubscriptionMatch},
    tier_resolver::{self, ResolvedBilling},
};

/// Stage of one reconciliation, attached to failure logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SyncPhase {
    Lookup,
    Invoices,
    Write,
}

// ============================================================================
// Result Types
// ============================================================================

/// What one reconciliation found and wrote.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub resolved: ResolvedBilling,
    /// `None` when no subscription was found
    pub method: Option<SyncMethod>,
    pub write: WriteReport,
}

impl SyncOutcome {
    pub fn found(&self) -> bool {
        self.method.is_some()
    }

    pub fn to_response(&self) -> SyncResponse {
        match self.method {
            Some(method) => SyncResponse::synced(method, self.resolved.billing_status),
            None => SyncResponse::not_synced(SyncReason::NoSubscriptionFound),
        }
    }
}

/// Invoices fetched for a customer right before a manual write.
///
/// Only `fetch` builds one, so a manual write cannot skip the invoice check.
#[derive(Debug, Clone)]
pub struct CheckedInvoices {
    invoices: Vec<InvoiceSnapshot>,
}

impl CheckedInvoices {
    /// With no customer there is nothing to bill and the list is empty.
    pub async fn fetch(
        provider: &dyn PaymentProviderPort,
        customer_id: Option<&CustomerId>,
    ) -> AppResult<Self> {
        let invoices = match customer_id {
            Some(id) => provider.list_invoices(id).await?,
            None => Vec::new(),
        };
        Ok(Self { invoices })
    }

    pub fn invoices(&self) -> &[InvoiceSnapshot] {
        &self.invoices
    }

    pub fn unpaid(&self) -> impl Iterator<Item = &InvoiceSnapshot> {
        self.invoices.iter().filter(|i| i.status.is_unpaid())
    }

    pub fn reason_code(&self) -> SyncReasonCode {
        if self.unpaid().next().is_some() {
            SyncReasonCode::UnpaidInvoices
        } else {
            SyncReasonCode::ManualSync
        }
    }
}

/// Structured result printed by the operator tool.
#[derive(Debug, Clone, Serialize)]
pub struct ManualSyncReport {
    pub email: String,
    pub user_id: Option<String>,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub method: Option<SyncMethod>,
    pub plan: Plan,
    pub billing_status: BillingStatus,
    pub tier: Tier,
    pub invoices_checked: usize,
    pub unpaid_invoices: usize,
    pub unpaid_amount_cents: i64,
    pub reason: Option<SyncReasonCode>,
    pub durable_updated: bool,
    pub cache_updated: bool,
    pub message: String,
}

impl ManualSyncReport {
    fn no_user(email: &str) -> Self {
        Self {
            email: email.to_string(),
            user_id: None,
            customer_id: None,
            subscription_id: None,
            method: None,
            plan: Plan::None,
            billing_status: BillingStatus::None,
            tier: Tier::Free,
            invoices_checked: 0,
            unpaid_invoices: 0,
            unpaid_amount_cents: 0,
            reason: None,
            durable_updated: false,
            cache_updated: false,
            message: "no user with this email".to_string(),
        }
    }

    /// A subscription was found and written.
    pub fn succeeded(&self) -> bool {
        self.method.is_some() && self.durable_updated
    }
}

// ============================================================================
// Use Cases
// ============================================================================

#[derive(Clone)]
pub struct BillingSyncUseCases {
    repo: Arc<dyn UserBillingRepo>,
    provider: Arc<dyn PaymentProviderPort>,
    writer: BillingWriter,
    price_table: Arc<PriceTierTable>,
}

impl BillingSyncUseCases {
    pub fn new(
        repo: Arc<dyn UserBillingRepo>,
        provider: Arc<dyn PaymentProviderPort>,
        writer: BillingWriter,
        price_table: Arc<PriceTierTable>,
    ) -> Self {
        Self {
            repo,
            provider,
            writer,
            price_table,
        }
    }

    /// On-demand sync for the signed-in user (app load, post-checkout).
    #[instrument(skip(self))]
    pub async fn sync_user(&self, user_id: &str) -> AppResult<SyncResponse> {
        let Some(profile) = self.repo.get_by_user_id(user_id).await? else {
            tracing::info!(user_id = %user_id, "Billing sync requested for unknown user");
            return Ok(SyncResponse::not_synced(SyncReason::NoUser));
        };

        let outcome = self.reconcile(&profile).await?;
        Ok(outcome.to_response())
    }

    /// Full reconciliation: strategy chain, invoices, resolve, write.
    pub async fn reconcile(&self, profile: &UserBillingProfile) -> AppResult<SyncOutcome> {
        if !profile.billing.is_consistent() {
            tracing::warn!(
                user_id = %profile.user_id,
                plan = %profile.billing.plan,
                billing_status = %profile.billing.billing_status,
                tier = %profile.billing.tier,
                "Stored billing record is inconsistent, rewriting from provider"
            );
        }

        let ctx = LookupContext::from_profile(profile);
        let lookup =
            subscription_lookup::find_subscription(self.provider.as_ref(), &self.writer, &ctx)
                .await;

        match lookup {
            LookupOutcome::Found(found) => self.apply_match(profile, found).await,
            LookupOutcome::NotFound => self.apply_no_subscription(profile).await,
            LookupOutcome::TransientError(e) => {
                log_failure(&profile.user_id, SyncPhase::Lookup, &e);
                Err(e)
            }
        }
    }

    /// Invoice events: locate the user by customer and run the full sync.
    ///
    /// `Ok(None)` when no user owns this customer.
    #[instrument(skip(self))]
    pub async fn sync_customer(&self, customer_id: &str) -> AppResult<Option<SyncOutcome>> {
        let Some(profile) = self.repo.get_by_customer_id(customer_id).await? else {
            tracing::info!(customer_id = %customer_id, "No user for payment customer, skipping");
            return Ok(None);
        };
        self.reconcile(&profile).await.map(Some)
    }

    /// Subscription events name the subscription, so it is fetched by id
    /// instead of looked up through the strategy chain.
    ///
    /// The event payload only locates the user. Deliveries can be late or
    /// out of order, so the provider's current copy is what gets resolved.
    /// A subscription that no longer exists, or some other subscription that
    /// no longer grants access, falls back to the full sync so a live one is
    /// never overwritten.
    #[instrument(skip(self, event), fields(subscription_id = %event.subscription_id))]
    pub async fn sync_subscription_event(
        &self,
        event: &SubscriptionSnapshot,
    ) -> AppResult<Option<SyncOutcome>> {
        let customer_id = event.customer_id.as_str();
        let Some(profile) = self.repo.get_by_customer_id(customer_id).await? else {
            tracing::info!(customer_id = %customer_id, "No user for payment customer, skipping");
            return Ok(None);
        };

        let subscription = match self.provider.get_subscription(&event.subscription_id).await {
            Ok(Some(current)) => current,
            Ok(None) | Err(AppError::NotFound) => {
                tracing::info!(
                    user_id = %profile.user_id,
                    "Subscription from event no longer exists, running full sync"
                );
                return self.reconcile(&profile).await.map(Some);
            }
            Err(e) => {
                log_failure(&profile.user_id, SyncPhase::Lookup, &e);
                return Err(e);
            }
        };
        if subscription.status != event.status {
            tracing::info!(
                user_id = %profile.user_id,
                event_status = %event.status,
                current_status = %subscription.status,
                "Event payload is stale, applying current subscription state"
            );
        }

        let stored = profile.billing.stripe_subscription_id.as_deref();
        let is_other_subscription =
            stored.is_some_and(|id| id != subscription.subscription_id.as_str());
        if is_other_subscription && !subscription.status.to_billing_status().grants_access() {
            tracing::info!(
                user_id = %profile.user_id,
                stored_subscription_id = ?stored,
                "Event for a non-current subscription, running full sync"
            );
            return self.reconcile(&profile).await.map(Some);
        }

        let found = SubscriptionMatch {
            subscription,
            method: SyncMethod::Webhook,
        };
        self.apply_match(&profile, found).await.map(Some)
    }

    /// Operator override: look the customer up by email, check invoices,
    /// and rewrite the record with an audit reason.
    #[instrument(skip(self))]
    pub async fn manual_override(&self, email: &str) -> AppResult<ManualSyncReport> {
        let email = email.trim();
        if !validators::is_valid_email(email) {
            return Err(AppError::InvalidInput(format!("not an email address: {}", email)));
        }
        let Some(profile) = self.repo.get_by_email(email).await? else {
            tracing::warn!("Manual sync requested for an email with no user");
            return Ok(ManualSyncReport::no_user(email));
        };
        let user_id = profile.user_id.as_str();

        let customer_id = self.provider.find_customer_by_email(email).await?;

        let found = match &customer_id {
            Some(customer_id) => {
                if let Err(e) = self.writer.remember_customer(user_id, customer_id.as_str()).await {
                    tracing::warn!(
                        user_id = %user_id,
                        customer_id = %customer_id,
                        error = %e,
                        "Failed to persist discovered customer id"
                    );
                }
                subscription_lookup::live_subscription_for_customer(
                    self.provider.as_ref(),
                    customer_id,
                    SyncMethod::EmailLookup,
                    SyncMethod::EmailLookupTrialing,
                )
                .await
                .into_result()?
            }
            None => None,
        };

        let checked = CheckedInvoices::fetch(self.provider.as_ref(), customer_id.as_ref())
            .await
            .inspect_err(|e| log_failure(user_id, SyncPhase::Invoices, e))?;

        let resolved = tier_resolver::resolve(
            found.as_ref().map(|m| &m.subscription),
            checked.invoices(),
            &self.price_table,
        );
        let reason = checked.reason_code();
        let mut update = BillingUpdate::from_resolved(&resolved, Some(reason));
        if update.stripe_customer_id.is_none() {
            update.stripe_customer_id = customer_id.as_ref().map(|id| id.as_str().to_string());
        }

        let write = self
            .writer
            .write(&profile, &update)
            .await
            .inspect_err(|e| log_failure(user_id, SyncPhase::Write, e))?;

        let unpaid: Vec<&InvoiceSnapshot> = checked.unpaid().collect();
        let message = match (&customer_id, &found) {
            (_, Some(_)) => "subscription synced".to_string(),
            (Some(_), None) => "no subscription found".to_string(),
            (None, None) => "no customer/subscription found".to_string(),
        };

        Ok(ManualSyncReport {
            email: email.to_string(),
            user_id: Some(profile.user_id.clone()),
            customer_id: update.stripe_customer_id.clone(),
            subscription_id: update.stripe_subscription_id.clone(),
            method: found.as_ref().map(|m| m.method),
            plan: resolved.plan,
            billing_status: resolved.billing_status,
            tier: resolved.tier,
            invoices_checked: checked.invoices().len(),
            unpaid_invoices: unpaid.len(),
            unpaid_amount_cents: unpaid.iter().map(|i| i.amount_due_cents).sum(),
            reason: Some(reason),
            durable_updated: write.durable_updated,
            cache_updated: write.cache_updated,
            message,
        })
    }

    /// Hosted billing portal for the user's stored customer.
    #[instrument(skip(self, return_url))]
    pub async fn create_portal_session(&self, user_id: &str, return_url: &str) -> AppResult<String> {
        let profile = self
            .repo
            .get_by_user_id(user_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let customer_id = profile
            .billing
            .stripe_customer_id
            .filter(|id| !id.is_empty())
            .ok_or(AppError::NotFound)?;

        self.provider
            .create_portal_session(&CustomerId::new(customer_id), return_url)
            .await
    }

    async fn apply_match(
        &self,
        profile: &UserBillingProfile,
        found: SubscriptionMatch,
    ) -> AppResult<SyncOutcome> {
        let invoices = self
            .provider
            .list_invoices(&found.subscription.customer_id)
            .await
            .inspect_err(|e| log_failure(&profile.user_id, SyncPhase::Invoices, e))?;

        let resolved =
            tier_resolver::resolve(Some(&found.subscription), &invoices, &self.price_table);

        if resolved.has_unpaid_invoice {
            tracing::info!(
                user_id = %profile.user_id,
                plan = %resolved.plan,
                "Unpaid invoice found, downgrading to free"
            );
        }

        let update = BillingUpdate::from_resolved(&resolved, None);
        let write = self
            .writer
            .write(profile, &update)
            .await
            .inspect_err(|e| log_failure(&profile.user_id, SyncPhase::Write, e))?;

        tracing::info!(
            user_id = %profile.user_id,
            method = %found.method,
            tier = %resolved.tier,
            billing_status = %resolved.billing_status,
            "Billing reconciled"
        );

        Ok(SyncOutcome {
            resolved,
            method: Some(found.method),
            write,
        })
    }

    async fn apply_no_subscription(&self, profile: &UserBillingProfile) -> AppResult<SyncOutcome> {
        let resolved = ResolvedBilling::no_subscription();
        let update = BillingUpdate::from_resolved(&resolved, None);
        let write = self
            .writer
            .write(profile, &update)
            .await
            .inspect_err(|e| log_failure(&profile.user_id, SyncPhase::Write, e))?;

        tracing::info!(
            user_id = %profile.user_id,
            "No subscription found, user set to free"
        );

        Ok(SyncOutcome {
            resolved,
            method: None,
            write,
        })
    }
}

fn log_failure(user_id: &str, phase: SyncPhase, error: &AppError) {
    tracing::error!(
        user_id = %user_id,
        phase = %phase,
        transient = error.is_transient(),
        error = %error,
        "Billing reconciliation failed"
    );
}
