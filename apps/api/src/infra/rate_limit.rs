use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::error::InfraError;
use crate::app_error::{AppError, AppResult};

/// Request throttling in front of the payment provider.
///
/// Every reconciliation costs several Stripe calls, so two limits apply:
/// a fixed window per client IP for all non-webhook traffic, and a cooldown
/// per user between two on-demand reconciliations.
#[async_trait]
pub trait RequestThrottle: Send + Sync {
    /// Count one request from `ip`. `AppError::RateLimited` past the window limit.
    async fn check_ip(&self, ip: &str) -> AppResult<()>;

    /// Claim the user's reconciliation slot. `AppError::RateLimited` while
    /// the previous claim is still cooling down.
    async fn claim_sync(&self, user_id: &str) -> AppResult<()>;
}

fn ip_key(ip: &str) -> String {
    format!("tally:throttle:ip:{ip}")
}

fn sync_key(user_id: &str) -> String {
    format!("tally:throttle:sync:{user_id}")
}

fn unavailable(e: redis::RedisError) -> AppError {
    tracing::error!(error = %e, "Request throttle unavailable");
    AppError::Internal(e.to_string())
}

#[derive(Clone)]
pub struct RedisThrottle {
    manager: ConnectionManager,
    window_secs: u64,
    max_per_ip: u64,
    sync_cooldown: Duration,
}

impl RedisThrottle {
    pub async fn new(
        redis_url: &str,
        window_secs: u64,
        max_per_ip: u64,
        sync_cooldown: Duration,
    ) -> Result<Self, InfraError> {
        let client = redis::Client::open(redis_url).map_err(InfraError::RedisConnection)?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(InfraError::RedisConnection)?;
        Ok(Self {
            manager,
            window_secs,
            max_per_ip,
            sync_cooldown,
        })
    }
}

#[async_trait]
impl RequestThrottle for RedisThrottle {
    async fn check_ip(&self, ip: &str) -> AppResult<()> {
        let key = ip_key(ip);
        let mut conn = self.manager.clone();

        // MULTI: the window starts with the first request and is never extended.
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&key)
            .arg(0)
            .arg("EX")
            .arg(self.window_secs)
            .arg("NX")
            .ignore()
            .cmd("INCR")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        if count > self.max_per_ip {
            tracing::debug!(ip = %ip, count, limit = self.max_per_ip, "IP window exhausted");
            return Err(AppError::RateLimited);
        }
        Ok(())
    }

    async fn claim_sync(&self, user_id: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let claimed: Option<String> = redis::cmd("SET")
            .arg(sync_key(user_id))
            .arg(1)
            .arg("PX")
            .arg(self.sync_cooldown.as_millis() as u64)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        if claimed.is_none() {
            tracing::debug!(user_id = %user_id, "Reconciliation requested during cooldown");
            return Err(AppError::RateLimited);
        }
        Ok(())
    }
}
