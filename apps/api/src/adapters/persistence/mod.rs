use sqlx::PgPool;
use std::str::FromStr;

use crate::app_error::AppError;

pub mod user_billing;

/// Parse a TEXT enum column, logging a warning and falling back to the
/// default when the stored value is not recognised.
///
/// SQL NULL yields the default without a warning.
pub fn parse_enum_with_fallback<T: FromStr + Default>(
    raw: Option<&str>,
    column: &str,
    user_id: &str,
) -> T {
    let Some(raw) = raw else {
        return T::default();
    };

    raw.parse().unwrap_or_else(|_| {
        tracing::warn!(
            column = column,
            user_id = user_id,
            raw_value = %raw,
            "Unrecognised value in billing column, using default"
        );
        T::default()
    })
}

#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub fn new(pool: PgPool) -> Self {
        PostgresPersistence { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound,
            sqlx::Error::PoolTimedOut => {
                tracing::error!("Database pool acquire timed out");
                AppError::Database("Database unavailable".into())
            }
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                // PostgreSQL check violation (bad enum text)
                if msg.contains("violates check constraint") {
                    AppError::InvalidInput("Value rejected by the database".into())
                } else {
                    // Log the actual error for debugging, but don't expose details
                    tracing::error!(error = ?err, "Database error");
                    AppError::Database("Database operation failed".into())
                }
            }
            _ => {
                tracing::error!(error = ?err, "Database error");
                AppError::Database("Database operation failed".into())
            }
        }
    }
}
