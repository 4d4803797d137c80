//! HTTP client factory with consistent timeout configuration.
//!
//! Every outbound client (Stripe, identity provider) is built here so no
//! external call can hang a reconciliation indefinitely.

use reqwest::Client;
use std::time::Duration;

use crate::infra::error::InfraError;

/// Default connect timeout (TCP handshake + TLS).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout (total request/response time).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub fn build_client() -> Result<Client, InfraError> {
    build_client_with_timeout(DEFAULT_REQUEST_TIMEOUT)
}

/// For callers that need a tighter bound than the default.
pub fn build_client_with_timeout(request_timeout: Duration) -> Result<Client, InfraError> {
    Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(request_timeout))
        .timeout(request_timeout)
        .build()
        .map_err(InfraError::HttpClient)
}
