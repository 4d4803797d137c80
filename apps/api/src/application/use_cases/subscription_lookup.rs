use tally_types::SyncMethod;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::payment_provider::{
        CustomerId, PaymentProviderPort, SubscriptionId, SubscriptionSnapshot,
    },
    domain::entities::subscription_status::SubscriptionStatus,
};

use super::billing_writer::{BillingWriter, UserBillingProfile};

/// Enough to notice the provider returning more than one live subscription.
const LIST_LIMIT: u32 = 3;

// ============================================================================
// Types
// ============================================================================

/// Identifying fields known about a user when a lookup starts.
#[derive(Debug, Clone, Default)]
pub struct LookupContext {
    pub user_id: String,
    pub subscription_id: Option<SubscriptionId>,
    pub customer_id: Option<CustomerId>,
    pub email: Option<String>,
}

impl LookupContext {
    pub fn from_profile(profile: &UserBillingProfile) -> Self {
        Self {
            user_id: profile.user_id.clone(),
            subscription_id: profile
                .billing
                .stripe_subscription_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .map(SubscriptionId::new),
            customer_id: profile
                .billing
                .stripe_customer_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .map(CustomerId::new),
            email: profile.email.clone().filter(|e| !e.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionMatch {
    pub subscription: SubscriptionSnapshot,
    pub method: SyncMethod,
}

/// Result of one strategy (or of the whole chain).
///
/// `NotFound` is an ordinary outcome and lets the chain fall through.
/// `TransientError` stops the chain and fails the reconciliation.
#[derive(Debug)]
pub enum LookupOutcome {
    Found(SubscriptionMatch),
    NotFound,
    TransientError(AppError),
}

impl LookupOutcome {
    fn from_result<T>(
        result: AppResult<Option<T>>,
        on_found: impl FnOnce(T) -> SubscriptionMatch,
    ) -> Self {
        match result {
            Ok(Some(value)) => LookupOutcome::Found(on_found(value)),
            Ok(None) | Err(AppError::NotFound) => LookupOutcome::NotFound,
            Err(e) => LookupOutcome::TransientError(e),
        }
    }

    pub fn into_result(self) -> AppResult<Option<SubscriptionMatch>> {
        match self {
            LookupOutcome::Found(m) => Ok(Some(m)),
            LookupOutcome::NotFound => Ok(None),
            LookupOutcome::TransientError(e) => Err(e),
        }
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Strategy 1: fetch the stored subscription id directly, whatever its status.
pub async fn by_subscription_id(
    provider: &dyn PaymentProviderPort,
    subscription_id: &SubscriptionId,
) -> LookupOutcome {
    let outcome = LookupOutcome::from_result(
        provider.get_subscription(subscription_id).await,
        |subscription| SubscriptionMatch {
            subscription,
            method: SyncMethod::SubscriptionId,
        },
    );
    if matches!(outcome, LookupOutcome::NotFound) {
        tracing::info!(
            subscription_id = %subscription_id,
            "Stored subscription id is stale, falling through"
        );
    }
    outcome
}

/// Strategy 2: the customer's active subscriptions, then trialing ones.
pub async fn by_customer_id(
    provider: &dyn PaymentProviderPort,
    customer_id: &CustomerId,
) -> LookupOutcome {
    live_subscription_for_customer(
        provider,
        customer_id,
        SyncMethod::CustomerId,
        SyncMethod::CustomerIdTrialing,
    )
    .await
}

/// Strategy 3: discover the customer by email, remember it, then query as in
/// strategy 2.
///
/// `already_tried` is the customer strategy 2 just queried. If email resolves
/// to the same customer the queries would repeat, so the result is `NotFound`.
pub async fn by_email(
    provider: &dyn PaymentProviderPort,
    writer: &BillingWriter,
    user_id: &str,
    email: &str,
    already_tried: Option<&CustomerId>,
) -> LookupOutcome {
    let customer_id = match provider.find_customer_by_email(email).await {
        Ok(Some(id)) => id,
        Ok(None) | Err(AppError::NotFound) => {
            tracing::debug!(user_id = %user_id, "No payment customer registered for email");
            return LookupOutcome::NotFound;
        }
        Err(e) => return LookupOutcome::TransientError(e),
    };

    if already_tried == Some(&customer_id) {
        return LookupOutcome::NotFound;
    }

    // Independent side effect: the lookup still proceeds if this fails.
    if let Err(e) = writer.remember_customer(user_id, customer_id.as_str()).await {
        tracing::warn!(
            user_id = %user_id,
            customer_id = %customer_id,
            error = %e,
            "Failed to persist discovered customer id"
        );
    } else {
        tracing::info!(
            user_id = %user_id,
            customer_id = %customer_id,
            "Persisted customer id discovered by email"
        );
    }

    live_subscription_for_customer(
        provider,
        &customer_id,
        SyncMethod::EmailLookup,
        SyncMethod::EmailLookupTrialing,
    )
    .await
}

/// Active subscriptions first, then trialing. First result wins.
pub async fn live_subscription_for_customer(
    provider: &dyn PaymentProviderPort,
    customer_id: &CustomerId,
    active_method: SyncMethod,
    trialing_method: SyncMethod,
) -> LookupOutcome {
    for (status, method) in [
        (SubscriptionStatus::Active, active_method),
        (SubscriptionStatus::Trialing, trialing_method),
    ] {
        let subscriptions = match provider
            .list_subscriptions(customer_id, status, LIST_LIMIT)
            .await
        {
            Ok(subs) => subs,
            Err(AppError::NotFound) => return LookupOutcome::NotFound,
            Err(e) => return LookupOutcome::TransientError(e),
        };

        if subscriptions.len() > 1 {
            tracing::warn!(
                customer_id = %customer_id,
                status = %status,
                count = subscriptions.len(),
                "Customer has more than one subscription in this status, using the first"
            );
        }

        if let Some(subscription) = subscriptions.into_iter().next() {
            return LookupOutcome::Found(SubscriptionMatch {
                subscription,
                method,
            });
        }
    }

    LookupOutcome::NotFound
}

/// Run the strategies in order, stopping at the first match or transient
/// error. Strategies without the identifying field they need are skipped.
pub async fn find_subscription(
    provider: &dyn PaymentProviderPort,
    writer: &BillingWriter,
    ctx: &LookupContext,
) -> LookupOutcome {
    if let Some(subscription_id) = &ctx.subscription_id {
        match by_subscription_id(provider, subscription_id).await {
            LookupOutcome::NotFound => {}
            other => return other,
        }
    }

    if let Some(customer_id) = &ctx.customer_id {
        match by_customer_id(provider, customer_id).await {
            LookupOutcome::NotFound => {}
            other => return other,
        }
    }

    if let Some(email) = &ctx.email {
        return by_email(
            provider,
            writer,
            &ctx.user_id,
            email,
            ctx.customer_id.as_ref(),
        )
        .await;
    }

    LookupOutcome::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        FakeIdentityProvider, FakePaymentProvider, InMemoryUserBillingRepo, ProviderCall,
        create_test_profile, create_test_subscription,
    };
    use std::{sync::Arc, time::Duration};

    fn writer_for(repo: &Arc<InMemoryUserBillingRepo>) -> BillingWriter {
        BillingWriter::new(
            repo.clone(),
            Arc::new(FakeIdentityProvider::new()),
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
    }

    fn ctx(
        sub: Option<&str>,
        cus: Option<&str>,
        email: Option<&str>,
    ) -> LookupContext {
        LookupContext {
            user_id: "user_1".into(),
            subscription_id: sub.map(SubscriptionId::new),
            customer_id: cus.map(CustomerId::new),
            email: email.map(String::from),
        }
    }

    #[tokio::test]
    async fn stored_subscription_id_wins_regardless_of_status() {
        let provider = FakePaymentProvider::new();
        provider.add_subscription(create_test_subscription(|s| {
            s.subscription_id = SubscriptionId::new("sub_1");
            s.status = SubscriptionStatus::Canceled;
        }));
        let repo = Arc::new(InMemoryUserBillingRepo::new());

        let outcome =
            find_subscription(&provider, &writer_for(&repo), &ctx(Some("sub_1"), Some("cus_1"), None))
                .await;

        let LookupOutcome::Found(found) = outcome else {
            panic!("expected a match, got {outcome:?}");
        };
        assert_eq!(found.method, SyncMethod::SubscriptionId);
        assert_eq!(found.subscription.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn stale_subscription_id_falls_through_to_customer() {
        let provider = FakePaymentProvider::new();
        provider.add_subscription(create_test_subscription(|s| {
            s.subscription_id = SubscriptionId::new("sub_new");
            s.customer_id = CustomerId::new("cus_1");
        }));
        let repo = Arc::new(InMemoryUserBillingRepo::new());

        let outcome =
            find_subscription(&provider, &writer_for(&repo), &ctx(Some("sub_gone"), Some("cus_1"), None)).await;

        let LookupOutcome::Found(found) = outcome else {
            panic!("expected a match, got {outcome:?}");
        };
        assert_eq!(found.method, SyncMethod::CustomerId);
        assert_eq!(found.subscription.subscription_id.as_str(), "sub_new");
    }

    #[tokio::test]
    async fn active_is_preferred_over_trialing() {
        let provider = FakePaymentProvider::new();
        provider.add_subscription(create_test_subscription(|s| {
            s.subscription_id = SubscriptionId::new("sub_trial");
            s.status = SubscriptionStatus::Trialing;
        }));
        provider.add_subscription(create_test_subscription(|s| {
            s.subscription_id = SubscriptionId::new("sub_active");
        }));

        let outcome = by_customer_id(&provider, &CustomerId::new("cus_1")).await;

        let LookupOutcome::Found(found) = outcome else {
            panic!("expected a match, got {outcome:?}");
        };
        assert_eq!(found.subscription.subscription_id.as_str(), "sub_active");
        assert_eq!(found.method, SyncMethod::CustomerId);
    }

    #[tokio::test]
    async fn trialing_only_customer_reports_trialing_method() {
        let provider = FakePaymentProvider::new();
        provider.add_subscription(create_test_subscription(|s| {
            s.status = SubscriptionStatus::Trialing;
        }));

        let outcome = by_customer_id(&provider, &CustomerId::new("cus_1")).await;

        let LookupOutcome::Found(found) = outcome else {
            panic!("expected a match, got {outcome:?}");
        };
        assert_eq!(found.method, SyncMethod::CustomerIdTrialing);
    }

    #[tokio::test]
    async fn canceled_only_customer_is_not_found() {
        let provider = FakePaymentProvider::new();
        provider.add_subscription(create_test_subscription(|s| {
            s.status = SubscriptionStatus::Canceled;
        }));

        let outcome = by_customer_id(&provider, &CustomerId::new("cus_1")).await;

        assert!(matches!(outcome, LookupOutcome::NotFound));
    }

    #[tokio::test]
    async fn email_lookup_persists_customer_id_and_finds_trialing() {
        let provider = FakePaymentProvider::new();
        provider.add_customer("ana@example.com", "cus_ana");
        provider.add_subscription(create_test_subscription(|s| {
            s.customer_id = CustomerId::new("cus_ana");
            s.status = SubscriptionStatus::Trialing;
        }));
        let repo = Arc::new(InMemoryUserBillingRepo::new());
        repo.insert(create_test_profile(|p| {
            p.user_id = "user_1".into();
            p.email = Some("ana@example.com".into());
        }));

        let outcome =
            find_subscription(&provider, &writer_for(&repo), &ctx(None, None, Some("ana@example.com"))).await;

        let LookupOutcome::Found(found) = outcome else {
            panic!("expected a match, got {outcome:?}");
        };
        assert_eq!(found.method, SyncMethod::EmailLookupTrialing);
        let stored = repo.get("user_1").expect("profile");
        assert_eq!(stored.billing.stripe_customer_id.as_deref(), Some("cus_ana"));
    }

    #[tokio::test]
    async fn customer_id_persist_failure_does_not_abort_lookup() {
        let provider = FakePaymentProvider::new();
        provider.add_customer("ana@example.com", "cus_ana");
        provider.add_subscription(create_test_subscription(|s| {
            s.customer_id = CustomerId::new("cus_ana");
        }));
        let repo = Arc::new(InMemoryUserBillingRepo::new());
        repo.fail_writes(true);

        let outcome =
            by_email(&provider, &writer_for(&repo), "user_1", "ana@example.com", None).await;

        let LookupOutcome::Found(found) = outcome else {
            panic!("expected a match, got {outcome:?}");
        };
        assert_eq!(found.method, SyncMethod::EmailLookup);
    }

    #[tokio::test]
    async fn email_resolving_to_tried_customer_skips_requery() {
        let provider = FakePaymentProvider::new();
        provider.add_customer("ana@example.com", "cus_1");
        let repo = Arc::new(InMemoryUserBillingRepo::new());

        let outcome =
            find_subscription(&provider, &writer_for(&repo), &ctx(None, Some("cus_1"), Some("ana@example.com")))
                .await;

        assert!(matches!(outcome, LookupOutcome::NotFound));
        let list_calls = provider
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ProviderCall::ListSubscriptions { .. }))
            .count();
        assert_eq!(list_calls, 2, "active + trialing for cus_1 only once");
    }

    #[tokio::test]
    async fn nothing_known_is_not_found_without_provider_calls() {
        let provider = FakePaymentProvider::new();
        let repo = Arc::new(InMemoryUserBillingRepo::new());

        let outcome = find_subscription(&provider, &writer_for(&repo), &ctx(None, None, None)).await;

        assert!(matches!(outcome, LookupOutcome::NotFound));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn transient_error_stops_the_chain() {
        let provider = FakePaymentProvider::new();
        provider.add_customer("ana@example.com", "cus_ana");
        provider.fail_next_calls(1);
        let repo = Arc::new(InMemoryUserBillingRepo::new());

        let outcome =
            find_subscription(&provider, &writer_for(&repo), &ctx(Some("sub_1"), None, Some("ana@example.com")))
                .await;

        assert!(matches!(outcome, LookupOutcome::TransientError(_)));
        assert_eq!(provider.calls().len(), 1);
    }
}
