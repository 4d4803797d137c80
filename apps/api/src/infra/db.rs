use std::str::FromStr;

use secrecy::ExposeSecret;
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use tracing::info;

use crate::infra::{config::DatabaseConfig, error::InfraError};

pub async fn init_db(config: &DatabaseConfig) -> Result<PgPool, InfraError> {
    // Server-side bound for every statement, including the customer id write
    // that runs outside the billing writer.
    let options = PgConnectOptions::from_str(config.url.expose_secret())
        .map_err(InfraError::DatabaseConnection)?
        .options([(
            "statement_timeout",
            format!("{}ms", config.write_timeout.as_millis()),
        )]);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
        .map_err(InfraError::DatabaseConnection)?;

    info!(
        statement_timeout_ms = config.write_timeout.as_millis() as u64,
        "Connected to database!"
    );
    Ok(pool)
}
