use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tally_types::BillingMetadata;
use url::Url;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::identity_provider::IdentityProviderPort,
};

/// Backend API of the hosted identity provider.
///
/// `PATCH /users/{id}/metadata` merges top-level keys into the stored
/// metadata; keys sent as `null` are removed. Nothing else is touched.
#[derive(Clone)]
pub struct IdentityApiClient {
    client: Client,
    base_url: Url,
    secret_key: SecretString,
}

impl IdentityApiClient {
    pub fn new(client: Client, base_url: Url, secret_key: SecretString) -> Self {
        Self {
            client,
            base_url,
            secret_key,
        }
    }

    fn user_url(&self, user_id: &str, suffix: &str) -> AppResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Internal("identity base url cannot be a base".into()))?
            .pop_if_empty()
            .push("users")
            .push(user_id)
            .extend(suffix.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }
}

fn request_error(e: reqwest::Error) -> AppError {
    AppError::IdentityProvider(format!("request failed: {}", e))
}

#[async_trait]
impl IdentityProviderPort for IdentityApiClient {
    async fn merge_billing_metadata(
        &self,
        user_id: &str,
        metadata: &BillingMetadata,
    ) -> AppResult<()> {
        let url = self.user_url(user_id, "metadata")?;
        let body = json!({ "public_metadata": metadata.to_json_object() });

        let response = self
            .client
            .patch(url)
            .bearer_auth(self.secret_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound);
        }
        if !status.is_success() {
            return Err(AppError::IdentityProvider(format!(
                "metadata merge returned {}",
                status
            )));
        }
        Ok(())
    }
}
