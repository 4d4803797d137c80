use async_trait::async_trait;
use sqlx::Row;

use crate::{
    adapters::persistence::{PostgresPersistence, parse_enum_with_fallback},
    app_error::{AppError, AppResult},
    application::use_cases::billing_writer::{BillingUpdate, UserBillingProfile, UserBillingRepo},
    domain::entities::billing_record::{BillingRecord, SyncReasonCode},
};

fn row_to_profile(row: &sqlx::postgres::PgRow) -> UserBillingProfile {
    let user_id: String = row.get("id");
    let sync_reason = row
        .get::<Option<String>, _>("billing_sync_reason")
        .and_then(|raw| raw.parse::<SyncReasonCode>().ok());

    let billing = BillingRecord {
        plan: parse_enum_with_fallback(row.get::<Option<&str>, _>("plan"), "plan", &user_id),
        billing_status: parse_enum_with_fallback(
            row.get::<Option<&str>, _>("billing_status"),
            "billing_status",
            &user_id,
        ),
        tier: parse_enum_with_fallback(row.get::<Option<&str>, _>("tier"), "tier", &user_id),
        current_period_end: row.get("current_period_end"),
        cancel_at_period_end: row.get("cancel_at_period_end"),
        stripe_subscription_id: row.get("stripe_subscription_id"),
        stripe_customer_id: row.get("stripe_customer_id"),
        sync_reason,
        updated_at: row.get("billing_updated_at"),
    };

    UserBillingProfile {
        user_id,
        email: row.get("email"),
        billing,
    }
}

const SELECT_COLS: &str = r#"
    id, email, plan, billing_status, tier, current_period_end, cancel_at_period_end,
    stripe_subscription_id, stripe_customer_id, billing_sync_reason, billing_updated_at
"#;

#[async_trait]
impl UserBillingRepo for PostgresPersistence {
    async fn get_by_user_id(&self, user_id: &str) -> AppResult<Option<UserBillingProfile>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = $1", SELECT_COLS))
            .bind(user_id)
            .fetch_optional(self.pool())
            .await
            .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<UserBillingProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE lower(email) = lower($1) ORDER BY created_at ASC LIMIT 1",
            SELECT_COLS
        ))
        .bind(email.trim())
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn get_by_customer_id(
        &self,
        customer_id: &str,
    ) -> AppResult<Option<UserBillingProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE stripe_customer_id = $1 \
             ORDER BY billing_updated_at DESC NULLS LAST LIMIT 1",
            SELECT_COLS
        ))
        .bind(customer_id)
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn apply_billing_update(
        &self,
        user_id: &str,
        update: &BillingUpdate,
    ) -> AppResult<Option<String>> {
        let row = sqlx::query(
            r#"
            UPDATE users SET
                plan = $2,
                billing_status = $3,
                tier = $4,
                current_period_end = $5,
                cancel_at_period_end = $6,
                stripe_subscription_id = $7,
                stripe_customer_id = COALESCE($8, stripe_customer_id),
                billing_sync_reason = $9,
                billing_updated_at = NOW()
            WHERE id = $1
            RETURNING stripe_customer_id
            "#,
        )
        .bind(user_id)
        .bind(update.plan.as_str())
        .bind(update.billing_status.as_str())
        .bind(update.tier.as_str())
        .bind(update.current_period_end)
        .bind(update.cancel_at_period_end)
        .bind(update.stripe_subscription_id.as_deref())
        .bind(update.stripe_customer_id.as_deref())
        .bind(update.sync_reason.map(|r| r.as_ref().to_string()))
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?
        .ok_or(AppError::NotFound)?;

        Ok(row.get("stripe_customer_id"))
    }

    async fn set_customer_id(&self, user_id: &str, customer_id: &str) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET stripe_customer_id = $2 WHERE id = $1")
            .bind(user_id)
            .bind(customer_id)
            .execute(self.pool())
            .await
            .map_err(AppError::from)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }
}
