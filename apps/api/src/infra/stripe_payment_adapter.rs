use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::{
    app_error::AppResult,
    application::ports::payment_provider::{
        CustomerId, InvoiceSnapshot, PaymentProviderPort, SubscriptionId, SubscriptionSnapshot,
    },
    domain::entities::{invoice_status::InvoiceStatus, subscription_status::SubscriptionStatus},
    infra::stripe_client::{StripeClient, StripeInvoice, StripeSubscription},
};

/// How many recent invoices are inspected for an unpaid balance.
const INVOICE_LOOKBACK: u32 = 10;

/// Adapter that wraps StripeClient to implement PaymentProviderPort.
#[derive(Clone)]
pub struct StripePaymentAdapter {
    client: StripeClient,
}

impl StripePaymentAdapter {
    pub fn new(client: StripeClient) -> Self {
        Self { client }
    }

    /// Convert optional timestamp to Option<DateTime<Utc>>
    fn opt_timestamp_to_datetime(ts: Option<i64>) -> Option<DateTime<Utc>> {
        ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    }

    pub fn subscription_snapshot(sub: &StripeSubscription) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            subscription_id: SubscriptionId::new(sub.id.clone()),
            customer_id: CustomerId::new(sub.customer.clone()),
            status: SubscriptionStatus::from_stripe(&sub.status),
            price_ids: sub.price_ids(),
            current_period_end: Self::opt_timestamp_to_datetime(sub.period_end()),
            cancel_at_period_end: sub.cancel_at_period_end,
        }
    }

    fn invoice_snapshot(invoice: StripeInvoice, customer_id: &CustomerId) -> InvoiceSnapshot {
        InvoiceSnapshot {
            invoice_id: invoice.id,
            customer_id: invoice
                .customer
                .map(CustomerId::new)
                .unwrap_or_else(|| customer_id.clone()),
            status: InvoiceStatus::from_stripe(invoice.status.as_deref()),
            amount_due_cents: invoice.amount_due,
        }
    }
}

#[async_trait]
impl PaymentProviderPort for StripePaymentAdapter {
    async fn get_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<SubscriptionSnapshot>> {
        let sub = self.client.get_subscription(subscription_id.as_str()).await?;
        Ok(sub.as_ref().map(Self::subscription_snapshot))
    }

    async fn list_subscriptions(
        &self,
        customer_id: &CustomerId,
        status: SubscriptionStatus,
        limit: u32,
    ) -> AppResult<Vec<SubscriptionSnapshot>> {
        let list = self
            .client
            .list_subscriptions(customer_id.as_str(), status.as_ref(), limit)
            .await?;

        if list.has_more {
            tracing::warn!(
                customer_id = %customer_id,
                status = %status,
                "Stripe reports more subscriptions than requested"
            );
        }

        Ok(list.data.iter().map(Self::subscription_snapshot).collect())
    }

    async fn find_customer_by_email(&self, email: &str) -> AppResult<Option<CustomerId>> {
        let customer = self.client.find_customer_by_email(email).await?;
        Ok(customer.map(|c| CustomerId::new(c.id)))
    }

    async fn list_invoices(&self, customer_id: &CustomerId) -> AppResult<Vec<InvoiceSnapshot>> {
        let invoices = self
            .client
            .list_invoices(customer_id.as_str(), INVOICE_LOOKBACK)
            .await?;
        Ok(invoices
            .into_iter()
            .map(|invoice| Self::invoice_snapshot(invoice, customer_id))
            .collect())
    }

    async fn create_portal_session(
        &self,
        customer_id: &CustomerId,
        return_url: &str,
    ) -> AppResult<String> {
        let session = self
            .client
            .create_portal_session(customer_id.as_str(), return_url)
            .await?;
        Ok(session.url)
    }
}
