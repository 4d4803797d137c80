use tally_types::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Too many requests. Please slow down.")]
    RateLimited,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found")]
    NotFound,

    /// Network, timeout, rate limit or 5xx from the payment provider.
    #[error("Payment provider error: {0}")]
    PaymentProvider(String),

    #[error("Identity provider error: {0}")]
    IdentityProvider(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::RateLimited => ErrorCode::RateLimited,
            AppError::InvalidCredentials => ErrorCode::InvalidCredentials,
            AppError::InvalidInput(_) => ErrorCode::InvalidInput,
            AppError::NotFound => ErrorCode::NotFound,
            AppError::PaymentProvider(_) | AppError::IdentityProvider(_) => {
                ErrorCode::ProviderUnavailable
            }
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// True for failures a later invocation may not hit (upstream outages,
    /// timeouts, pool exhaustion).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::PaymentProvider(_)
                | AppError::IdentityProvider(_)
                | AppError::Internal(_)
                | AppError::RateLimited
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;
