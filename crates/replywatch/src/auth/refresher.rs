//! OAuth2 refresh-token grant.

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::TokenError;
use crate::config::ProviderConfig;
use crate::provider::sanitize_error_body;

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires.
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

pub struct OAuthRefresher {
    client: Client,
    token_url: String,
    client_id: SecretString,
    client_secret: Option<SecretString>,
}

impl OAuthRefresher {
    pub fn new(
        config: &ProviderConfig,
        client_id: SecretString,
        client_secret: Option<SecretString>,
    ) -> Result<Self, TokenError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TokenError::RefreshFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token_url: config.token_url.clone(),
            client_id,
            client_secret,
        })
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenResponse, TokenError> {
        log::debug!("Refreshing access token via {}", self.token_url);

        let mut params = vec![
            ("client_id", self.client_id.expose_secret()),
            ("refresh_token", refresh_token.expose_secret()),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.expose_secret()));
        }

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| TokenError::RefreshFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::RefreshFailed(format!(
                "{}: {}",
                status,
                sanitize_error_body(&body)
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| TokenError::RefreshFailed(format!("Failed to parse refresh response: {}", e)))
    }
}
