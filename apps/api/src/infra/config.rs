use std::{net::SocketAddr, str::FromStr, time::Duration};

use axum::http::HeaderValue;
use secrecy::SecretString;
use url::Url;

use crate::{
    application::validators::is_valid_price_id,
    domain::entities::price_tier_table::PriceTierTable,
    infra::error::InfraError,
};

/// Reads one environment variable. Swappable so tests never touch the
/// process environment.
pub trait ConfigSource {
    fn get(&self, var: &'static str) -> Option<String>;
}

impl<F> ConfigSource for F
where
    F: Fn(&'static str) -> Option<String>,
{
    fn get(&self, var: &'static str) -> Option<String> {
        self(var).filter(|v| !v.trim().is_empty())
    }
}

pub fn process_env(var: &'static str) -> Option<String> {
    std::env::var(var).ok()
}

fn required(source: &impl ConfigSource, var: &'static str) -> Result<String, InfraError> {
    source.get(var).ok_or(InfraError::ConfigMissing { var })
}

/// `default` when unset; `ConfigInvalid` when set but unparseable.
fn parsed_or<T: FromStr>(
    source: &impl ConfigSource,
    var: &'static str,
    default: T,
) -> Result<T, InfraError> {
    match source.get(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| InfraError::ConfigInvalid { var }),
        None => Ok(default),
    }
}

// ============================================================================
// Stripe
// ============================================================================

pub struct StripeConfig {
    pub secret_key: SecretString,
    pub premium_price_ids: Vec<String>,
}

impl StripeConfig {
    pub fn from_source(source: &impl ConfigSource) -> Result<Self, InfraError> {
        let secret_key = SecretString::from(required(source, "STRIPE_SECRET_KEY")?);
        let premium_price_ids = ["STRIPE_PREMIUM_MONTHLY_PRICE_ID", "STRIPE_PREMIUM_ANNUAL_PRICE_ID"]
            .into_iter()
            .map(|var| {
                let id = required(source, var)?;
                if is_valid_price_id(&id) {
                    Ok(id)
                } else {
                    Err(InfraError::ConfigInvalid { var })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            secret_key,
            premium_price_ids,
        })
    }

    pub fn price_table(&self) -> PriceTierTable {
        PriceTierTable::new(self.premium_price_ids.iter().cloned())
    }
}

// ============================================================================
// Identity provider
// ============================================================================

pub struct IdentityConfig {
    pub api_url: Url,
    pub secret_key: SecretString,
    pub cache_write_timeout: Duration,
}

impl IdentityConfig {
    pub fn from_source(source: &impl ConfigSource) -> Result<Self, InfraError> {
        let raw_url = required(source, "IDENTITY_API_URL")?;
        let api_url = Url::parse(&raw_url).map_err(|_| InfraError::ConfigInvalid {
            var: "IDENTITY_API_URL",
        })?;
        let secret_key = SecretString::from(required(source, "IDENTITY_SECRET_KEY")?);
        let cache_write_timeout_ms: u64 = parsed_or(source, "CACHE_WRITE_TIMEOUT_MS", 3_000)?;

        Ok(Self {
            api_url,
            secret_key,
            cache_write_timeout: Duration::from_millis(cache_write_timeout_ms),
        })
    }
}

// ============================================================================
// Database
// ============================================================================

pub struct DatabaseConfig {
    pub url: SecretString,
    pub acquire_timeout: Duration,
    /// Upper bound for one billing write, also sent as `statement_timeout`
    pub write_timeout: Duration,
}

impl DatabaseConfig {
    pub fn from_source(source: &impl ConfigSource) -> Result<Self, InfraError> {
        let url = SecretString::from(required(source, "DATABASE_URL")?);
        let acquire_timeout_secs: u64 = parsed_or(source, "DB_ACQUIRE_TIMEOUT_SECS", 5)?;
        let write_timeout_ms: u64 = parsed_or(source, "DB_WRITE_TIMEOUT_MS", 5_000)?;
        Ok(Self {
            url,
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
            write_timeout: Duration::from_millis(write_timeout_ms),
        })
    }
}

// ============================================================================
// HTTP server
// ============================================================================

/// What request handlers and middleware read at runtime.
pub struct HttpConfig {
    pub session_jwt_secret: SecretString,
    /// Webhook requests are rejected while unset
    pub stripe_webhook_secret: Option<SecretString>,
    /// Where the billing portal sends the user back to
    pub portal_return_url: String,
    pub cors_origin: HeaderValue,
    /// Whether to trust X-Forwarded-For headers. Set to true when behind a reverse proxy.
    /// SECURITY: Only enable this when the API is not directly exposed to the internet.
    pub trust_proxy: bool,
}

pub struct AppConfig {
    pub stripe: StripeConfig,
    pub identity: IdentityConfig,
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub bind_addr: SocketAddr,
    pub redis_url: String,
    pub rate_limit_window_secs: u64,
    pub rate_limit_per_ip: u64,
    /// Minimum gap between two `/verify` reconciliations of the same user
    pub verify_cooldown: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, InfraError> {
        Self::from_source(&process_env)
    }

    /// All required variables are checked before anything is built.
    pub fn from_source(source: &impl ConfigSource) -> Result<Self, InfraError> {
        let stripe = StripeConfig::from_source(source)?;
        let identity = IdentityConfig::from_source(source)?;
        let database = DatabaseConfig::from_source(source)?;
        let session_jwt_secret = SecretString::from(required(source, "SESSION_JWT_SECRET")?);
        let stripe_webhook_secret = source.get("STRIPE_WEBHOOK_SECRET").map(SecretString::from);
        if stripe_webhook_secret.is_none() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET not set, webhook deliveries will be rejected");
        }

        let cors_origin_raw = source
            .get("CORS_ORIGIN")
            .unwrap_or_else(|| String::from("http://localhost:3000"));
        let cors_origin: HeaderValue = cors_origin_raw
            .parse()
            .map_err(|_| InfraError::ConfigInvalid { var: "CORS_ORIGIN" })?;
        let portal_return_url = source.get("PORTAL_RETURN_URL").unwrap_or_else(|| {
            format!("{}/settings/billing", cors_origin_raw.trim_end_matches('/'))
        });
        // Default to false for security - must explicitly enable when behind a trusted proxy
        let trust_proxy: bool = parsed_or(source, "TRUST_PROXY", false)?;

        let bind_addr: SocketAddr =
            parsed_or(source, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3001)))?;
        let redis_url = source
            .get("REDIS_URL")
            .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());
        let rate_limit_window_secs: u64 = parsed_or(source, "RATE_LIMIT_WINDOW_SECS", 60)?;
        let rate_limit_per_ip: u64 = parsed_or(source, "RATE_LIMIT_PER_IP", 60)?;
        let verify_cooldown_ms: u64 = parsed_or(source, "VERIFY_COOLDOWN_MS", 5_000)?;

        Ok(Self {
            stripe,
            identity,
            database,
            http: HttpConfig {
                session_jwt_secret,
                stripe_webhook_secret,
                portal_return_url,
                cors_origin,
                trust_proxy,
            },
            bind_addr,
            redis_url,
            rate_limit_window_secs,
            rate_limit_per_ip,
            verify_cooldown: Duration::from_millis(verify_cooldown_ms),
        })
    }
}
