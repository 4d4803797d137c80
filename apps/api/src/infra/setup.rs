use std::fs::File;
use std::sync::Arc;

use env_helpers::get_env_default;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    adapters::{http::app_state::AppState, identity::IdentityApiClient},
    application::use_cases::{
        billing_sync::BillingSyncUseCases,
        billing_writer::{BillingWriter, UserBillingRepo},
    },
    infra::{
        RequestThrottle,
        config::{AppConfig, DatabaseConfig, IdentityConfig, StripeConfig},
        http_client::{build_client, build_client_with_timeout},
        postgres_persistence,
        rate_limit::RedisThrottle,
        stripe_client::StripeClient,
        stripe_payment_adapter::StripePaymentAdapter,
    },
};

/// Everything the reconciliation engine needs, shared by the HTTP server
/// and the operator CLI.
pub async fn init_billing_use_cases(
    stripe_config: &StripeConfig,
    identity_config: &IdentityConfig,
    database_config: &DatabaseConfig,
) -> anyhow::Result<BillingSyncUseCases> {
    let persistence = Arc::new(postgres_persistence(database_config).await?);
    let repo = persistence as Arc<dyn UserBillingRepo>;

    let stripe = StripeClient::new(build_client()?, stripe_config.secret_key.clone());
    let provider = Arc::new(StripePaymentAdapter::new(stripe));

    // The writer enforces the cache deadline; this only stops a hung connection.
    let identity_http = build_client_with_timeout(identity_config.cache_write_timeout * 2)?;
    let identity = Arc::new(IdentityApiClient::new(
        identity_http,
        identity_config.api_url.clone(),
        identity_config.secret_key.clone(),
    ));

    let writer = BillingWriter::new(
        repo.clone(),
        identity,
        database_config.write_timeout,
        identity_config.cache_write_timeout,
    );

    Ok(BillingSyncUseCases::new(
        repo,
        provider,
        writer,
        Arc::new(stripe_config.price_table()),
    ))
}

pub async fn init_app_state(config: AppConfig) -> anyhow::Result<AppState> {
    let billing_sync_use_cases = Arc::new(
        init_billing_use_cases(&config.stripe, &config.identity, &config.database).await?,
    );

    let throttle: Arc<dyn RequestThrottle> = Arc::new(
        RedisThrottle::new(
            &config.redis_url,
            config.rate_limit_window_secs,
            config.rate_limit_per_ip,
            config.verify_cooldown,
        )
        .await?,
    );

    Ok(AppState {
        config: Arc::new(config.http),
        billing_sync_use_cases,
        throttle,
    })
}

/// Console logs always; JSON logs to `LOG_FILE` when set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tally_api=debug,sync_billing=info,tower_http=debug".into());

    let console_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .pretty();

    let log_file: Option<String> = Some(get_env_default("LOG_FILE", String::new()))
        .filter(|p| !p.trim().is_empty());
    let (json_layer, file_error) = match log_file.map(|path| File::create(&path).map_err(|e| (path, e))) {
        Some(Ok(file)) => (
            Some(
                fmt::layer()
                    .json()
                    .with_writer(Arc::new(file))
                    .with_current_span(true)
                    .with_span_list(true)
                    .boxed(),
            ),
            None,
        ),
        Some(Err(err)) => (None, Some(err)),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .try_init()
        .ok();

    if let Some((path, e)) = file_error {
        tracing::warn!(path = %path, error = %e, "Cannot open log file, logging to console only");
    }
}
