//! In-memory fakes for the billing repository and the two external providers.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tally_types::BillingMetadata;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::{
            identity_provider::IdentityProviderPort,
            payment_provider::{
                CustomerId, InvoiceSnapshot, PaymentProviderPort, SubscriptionId,
                SubscriptionSnapshot,
            },
        },
        use_cases::billing_writer::{BillingUpdate, UserBillingProfile, UserBillingRepo},
    },
    domain::entities::subscription_status::SubscriptionStatus,
};

// ============================================================================
// InMemoryUserBillingRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryUserBillingRepo {
    pub profiles: Mutex<HashMap<String, UserBillingProfile>>,
    fail_writes: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
    billing_writes: AtomicUsize,
}

impl InMemoryUserBillingRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: Vec<UserBillingProfile>) -> Self {
        let repo = Self::new();
        for profile in profiles {
            repo.insert(profile);
        }
        repo
    }

    pub fn insert(&self, profile: UserBillingProfile) {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.user_id.clone(), profile);
    }

    pub fn get(&self, user_id: &str) -> Option<UserBillingProfile> {
        self.profiles.lock().unwrap().get(user_id).cloned()
    }

    /// Make every write fail with a database error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every write sleeps this long before touching the data.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = Some(delay);
    }

    /// Successful `apply_billing_update` calls so far.
    pub fn write_count(&self) -> usize {
        self.billing_writes.load(Ordering::SeqCst)
    }

    async fn check_writable(&self) -> AppResult<()> {
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserBillingRepo for InMemoryUserBillingRepo {
    async fn get_by_user_id(&self, user_id: &str) -> AppResult<Option<UserBillingProfile>> {
        Ok(self.get(user_id))
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<UserBillingProfile>> {
        let needle = email.trim().to_lowercase();
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .values()
            .find(|p| p.email.as_deref().map(str::to_lowercase).as_deref() == Some(needle.as_str()))
            .cloned())
    }

    async fn get_by_customer_id(
        &self,
        customer_id: &str,
    ) -> AppResult<Option<UserBillingProfile>> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.billing.stripe_customer_id.as_deref() == Some(customer_id))
            .max_by_key(|p| p.billing.updated_at)
            .cloned())
    }

    async fn apply_billing_update(
        &self,
        user_id: &str,
        update: &BillingUpdate,
    ) -> AppResult<Option<String>> {
        self.check_writable().await?;
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles.get_mut(user_id).ok_or(AppError::NotFound)?;

        let billing = &mut profile.billing;
        billing.plan = update.plan;
        billing.billing_status = update.billing_status;
        billing.tier = update.tier;
        billing.current_period_end = update.current_period_end;
        billing.cancel_at_period_end = update.cancel_at_period_end;
        billing.stripe_subscription_id = update.stripe_subscription_id.clone();
        if let Some(customer_id) = &update.stripe_customer_id {
            billing.stripe_customer_id = Some(customer_id.clone());
        }
        billing.sync_reason = update.sync_reason;
        billing.updated_at = Some(Utc::now());

        self.billing_writes.fetch_add(1, Ordering::SeqCst);
        Ok(billing.stripe_customer_id.clone())
    }

    async fn set_customer_id(&self, user_id: &str, customer_id: &str) -> AppResult<()> {
        self.check_writable().await?;
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles.get_mut(user_id).ok_or(AppError::NotFound)?;
        profile.billing.stripe_customer_id = Some(customer_id.to_string());
        Ok(())
    }
}

// ============================================================================
// FakePaymentProvider
// ============================================================================

/// One call made against [`FakePaymentProvider`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    GetSubscription(String),
    ListSubscriptions {
        customer_id: String,
        status: SubscriptionStatus,
    },
    FindCustomerByEmail(String),
    ListInvoices(String),
    CreatePortalSession(String),
}

impl ProviderCall {
    pub fn is_invoice_listing(&self) -> bool {
        matches!(self, ProviderCall::ListInvoices(_))
    }
}

/// Stripe stand-in. Calls are recorded even when they fail.
#[derive(Default)]
pub struct FakePaymentProvider {
    subscriptions: Mutex<Vec<SubscriptionSnapshot>>,
    customers: Mutex<HashMap<String, String>>,
    invoices: Mutex<Vec<InvoiceSnapshot>>,
    failures_left: Mutex<u32>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl FakePaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subscription(&self, subscription: SubscriptionSnapshot) {
        self.subscriptions.lock().unwrap().push(subscription);
    }

    pub fn add_customer(&self, email: &str, customer_id: &str) {
        self.customers
            .lock()
            .unwrap()
            .insert(email.to_lowercase(), customer_id.to_string());
    }

    pub fn add_invoice(&self, invoice: InvoiceSnapshot) {
        self.invoices.lock().unwrap().push(invoice);
    }

    /// The next `n` calls fail with a transient provider error.
    pub fn fail_next_calls(&self, n: u32) {
        *self.failures_left.lock().unwrap() = n;
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ProviderCall) -> AppResult<()> {
        self.calls.lock().unwrap().push(call);
        let mut failures_left = self.failures_left.lock().unwrap();
        if *failures_left > 0 {
            *failures_left -= 1;
            return Err(AppError::PaymentProvider("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProviderPort for FakePaymentProvider {
    async fn get_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<SubscriptionSnapshot>> {
        self.record(ProviderCall::GetSubscription(subscription_id.to_string()))?;
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| &s.subscription_id == subscription_id)
            .cloned())
    }

    async fn list_subscriptions(
        &self,
        customer_id: &CustomerId,
        status: SubscriptionStatus,
        limit: u32,
    ) -> AppResult<Vec<SubscriptionSnapshot>> {
        self.record(ProviderCall::ListSubscriptions {
            customer_id: customer_id.to_string(),
            status,
        })?;
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| &s.customer_id == customer_id && s.status == status)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_customer_by_email(&self, email: &str) -> AppResult<Option<CustomerId>> {
        self.record(ProviderCall::FindCustomerByEmail(email.to_string()))?;
        Ok(self
            .customers
            .lock()
            .unwrap()
            .get(&email.to_lowercase())
            .map(CustomerId::new))
    }

    async fn list_invoices(&self, customer_id: &CustomerId) -> AppResult<Vec<InvoiceSnapshot>> {
        self.record(ProviderCall::ListInvoices(customer_id.to_string()))?;
        Ok(self
            .invoices
            .lock()
            .unwrap()
            .iter()
            .filter(|i| &i.customer_id == customer_id)
            .cloned()
            .collect())
    }

    async fn create_portal_session(
        &self,
        customer_id: &CustomerId,
        _return_url: &str,
    ) -> AppResult<String> {
        self.record(ProviderCall::CreatePortalSession(customer_id.to_string()))?;
        Ok(format!("https://billing.stripe.test/p/session/{}", customer_id))
    }
}

// ============================================================================
// FakeIdentityProvider
// ============================================================================

/// Identity provider stand-in holding raw public metadata per user.
#[derive(Default)]
pub struct FakeIdentityProvider {
    metadata: Mutex<HashMap<String, Value>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every merge sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn seed_raw_metadata(&self, user_id: &str, metadata: Value) {
        self.metadata
            .lock()
            .unwrap()
            .insert(user_id.to_string(), metadata);
    }

    /// `Value::Null` when nothing was ever written for the user.
    pub fn raw_metadata(&self, user_id: &str) -> Value {
        self.metadata
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn billing_metadata(&self, user_id: &str) -> Option<BillingMetadata> {
        self.metadata
            .lock()
            .unwrap()
            .get(user_id)
            .map(BillingMetadata::from_public_metadata)
    }
}

#[async_trait]
impl IdentityProviderPort for FakeIdentityProvider {
    async fn merge_billing_metadata(
        &self,
        user_id: &str,
        metadata: &BillingMetadata,
    ) -> AppResult<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::IdentityProvider("injected failure".into()));
        }

        let mut all = self.metadata.lock().unwrap();
        let entry = all.entry(user_id.to_string()).or_insert_with(|| json!({}));
        if !entry.is_object() {
            *entry = json!({});
        }
        if let Some(existing) = entry.as_object_mut() {
            for (key, value) in metadata.to_json_object() {
                if value.is_null() {
                    existing.remove(&key);
                } else {
                    existing.insert(key, value);
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// InMemoryThrottle
// ============================================================================

/// Counts per IP for the whole test; a sync claim never expires.
pub struct InMemoryThrottle {
    ip_counts: Mutex<HashMap<String, u64>>,
    claimed: Mutex<HashSet<String>>,
    max_per_ip: u64,
    sync_cooldown: bool,
}

impl InMemoryThrottle {
    pub fn new(max_per_ip: u64, sync_cooldown: bool) -> Self {
        Self {
            ip_counts: Mutex::new(HashMap::new()),
            claimed: Mutex::new(HashSet::new()),
            max_per_ip,
            sync_cooldown,
        }
    }

    /// Never blocks.
    pub fn permissive() -> Self {
        Self::new(u64::MAX, false)
    }
}

#[async_trait]
impl crate::infra::RequestThrottle for InMemoryThrottle {
    async fn check_ip(&self, ip: &str) -> AppResult<()> {
        let mut counts = self.ip_counts.lock().unwrap();
        let count = counts.entry(ip.to_string()).or_insert(0);
        *count += 1;
        if *count > self.max_per_ip {
            return Err(AppError::RateLimited);
        }
        Ok(())
    }

    async fn claim_sync(&self, user_id: &str) -> AppResult<()> {
        if !self.sync_cooldown {
            return Ok(());
        }
        if !self.claimed.lock().unwrap().insert(user_id.to_string()) {
            return Err(AppError::RateLimited);
        }
        Ok(())
    }
}
