//! Test app state builder for HTTP-level integration testing.
//!
//! This module provides `TestAppStateBuilder` which creates a minimal `AppState`
//! with in-memory mocks for testing HTTP endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use secrecy::SecretString;

use crate::{
    adapters::http::app_state::AppState,
    application::{
        jwt,
        ports::payment_provider::{InvoiceSnapshot, SubscriptionSnapshot},
        use_cases::{
            billing_sync::BillingSyncUseCases,
            billing_writer::{BillingWriter, UserBillingProfile},
        },
    },
    infra::{RequestThrottle, config::HttpConfig},
    test_utils::{
        FakeIdentityProvider, FakePaymentProvider, InMemoryThrottle, InMemoryUserBillingRepo,
        test_price_table,
    },
};

pub const TEST_SESSION_SECRET: &str = "test_session_secret";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Session token for `user_id`, signed with [`TEST_SESSION_SECRET`].
pub fn test_session_token(user_id: &str) -> String {
    jwt::issue(
        user_id,
        &SecretString::from(TEST_SESSION_SECRET),
        chrono::Duration::minutes(10),
    )
    .unwrap()
}

/// Handles onto the fakes behind a built `AppState`, for assertions.
pub struct TestMocks {
    pub repo: Arc<InMemoryUserBillingRepo>,
    pub provider: Arc<FakePaymentProvider>,
    pub identity: Arc<FakeIdentityProvider>,
}

/// Builder for creating `AppState` with in-memory mocks for testing.
///
/// # Example
///
/// ```ignore
/// let (app_state, mocks) = TestAppStateBuilder::new()
///     .with_profile(create_test_profile(|p| p.billing.stripe_customer_id = Some("cus_1".into())))
///     .with_subscription(create_test_subscription(|_| {}))
///     .build_with_mocks();
/// ```
pub struct TestAppStateBuilder {
    profiles: Vec<UserBillingProfile>,
    subscriptions: Vec<SubscriptionSnapshot>,
    invoices: Vec<InvoiceSnapshot>,
    customers: Vec<(String, String)>,
    webhook_secret: Option<String>,
    throttle: Option<Arc<dyn RequestThrottle>>,
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        Self {
            profiles: vec![],
            subscriptions: vec![],
            invoices: vec![],
            customers: vec![],
            webhook_secret: Some(TEST_WEBHOOK_SECRET.to_string()),
            throttle: None,
        }
    }

    pub fn with_profile(mut self, profile: UserBillingProfile) -> Self {
        self.profiles.push(profile);
        self
    }

    pub fn with_subscription(mut self, subscription: SubscriptionSnapshot) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    pub fn with_invoice(mut self, invoice: InvoiceSnapshot) -> Self {
        self.invoices.push(invoice);
        self
    }

    /// Register a Stripe customer discoverable by email.
    pub fn with_customer(mut self, email: &str, customer_id: &str) -> Self {
        self.customers
            .push((email.to_string(), customer_id.to_string()));
        self
    }

    pub fn without_webhook_secret(mut self) -> Self {
        self.webhook_secret = None;
        self
    }

    pub fn with_throttle(mut self, throttle: Arc<dyn RequestThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn build(self) -> AppState {
        self.build_with_mocks().0
    }

    pub fn build_with_mocks(self) -> (AppState, TestMocks) {
        let repo = Arc::new(InMemoryUserBillingRepo::with_profiles(self.profiles));
        let provider = Arc::new(FakePaymentProvider::new());
        for subscription in self.subscriptions {
            provider.add_subscription(subscription);
        }
        for invoice in self.invoices {
            provider.add_invoice(invoice);
        }
        for (email, customer_id) in &self.customers {
            provider.add_customer(email, customer_id);
        }
        let identity = Arc::new(FakeIdentityProvider::new());

        let writer = BillingWriter::new(
            repo.clone(),
            identity.clone(),
            Duration::from_millis(200),
            Duration::from_millis(200),
        );
        let billing_sync_use_cases = Arc::new(BillingSyncUseCases::new(
            repo.clone(),
            provider.clone(),
            writer,
            Arc::new(test_price_table()),
        ));

        let config = Arc::new(HttpConfig {
            session_jwt_secret: SecretString::from(TEST_SESSION_SECRET),
            stripe_webhook_secret: self.webhook_secret.map(SecretString::from),
            portal_return_url: "http://localhost:3000/settings/billing".to_string(),
            cors_origin: HeaderValue::from_static("http://localhost:3000"),
            trust_proxy: false,
        });

        let throttle = self
            .throttle
            .unwrap_or_else(|| Arc::new(InMemoryThrottle::permissive()));

        let app_state = AppState {
            config,
            billing_sync_use_cases,
            throttle,
        };
        (
            app_state,
            TestMocks {
                repo,
                provider,
                identity,
            },
        )
    }
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
