//! Google OAuth2 token endpoint client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::GoogleOAuthConfig;
use crate::session::refresh::{OAuthProvider, ProviderError, RefreshedToken};

pub struct GoogleOAuth {
    http: reqwest::Client,
    config: GoogleOAuthConfig,
}

impl GoogleOAuth {
    pub fn new(config: GoogleOAuthConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("mail-gateway/0.1")
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        Ok(Self { http, config })
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuth {
    async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedToken, ProviderError> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .http
            .post(&self.config.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let payload: TokenEndpointResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        parse_token_response(payload)
    }
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

fn parse_token_response(payload: TokenEndpointResponse) -> Result<RefreshedToken, ProviderError> {
    if let Some(error) = payload.error {
        let description = payload.error_description.unwrap_or_else(|| error.clone());
        return if error == "invalid_grant" {
            Err(ProviderError::InvalidGrant(description))
        } else {
            Err(ProviderError::Http(format!("{}: {}", error, description)))
        };
    }

    let access_token = payload
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ProviderError::Malformed("no access_token in response".into()))?;

    Ok(RefreshedToken {
        access_token,
        // Google omits expires_in on rare occasions; one hour matches its
        // typical issuance.
        expires_in_secs: payload.expires_in.unwrap_or(3600),
        refresh_token: payload.refresh_token,
    })
}
