use crate::{
    adapters::persistence::PostgresPersistence,
    infra::{config::DatabaseConfig, db::init_db, error::InfraError},
};

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod http_client;
pub mod rate_limit;
pub mod setup;
pub mod stripe_client;
pub mod stripe_payment_adapter;

pub use rate_limit::RequestThrottle;

pub async fn postgres_persistence(
    config: &DatabaseConfig,
) -> Result<PostgresPersistence, InfraError> {
    let pool = init_db(config).await?;
    Ok(PostgresPersistence::new(pool))
}
