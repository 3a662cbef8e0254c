//! Token endpoint client for the authorization-code and refresh grants.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::time::Duration as StdDuration;

use crate::credential::TokenGrant;
use crate::error::AuthError;

/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Silent, non-interactive token exchange using a refresh token.
pub trait TokenRefresher: Send + Sync {
    /// Exchange `refresh_token` for a fresh access token.
    ///
    /// # Errors
    /// Returns [`AuthError::RefreshFailed`] when the exchange is rejected or
    /// the endpoint cannot be reached.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    id_token: Option<String>,
}

impl TokenResponse {
    /// `expires_in` is relative to receipt; the grant carries an absolute expiry.
    fn into_grant(self, received_at: DateTime<Utc>) -> Result<TokenGrant, String> {
        let lifetime = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let access_token_expiry = Duration::try_seconds(lifetime)
            .and_then(|d| received_at.checked_add_signed(d))
            .ok_or_else(|| format!("token response carried an unusable expires_in: {}", lifetime))?;
        Ok(TokenGrant {
            access_token: self.access_token,
            access_token_expiry,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            id_token: self.id_token,
        })
    }
}

/// Client for the provider's token endpoint.
#[derive(Debug, Clone)]
pub struct TokenEndpointClient {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl TokenEndpointClient {
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: None,
        }
    }

    pub fn with_client_secret(mut self, secret: Option<String>) -> Self {
        self.client_secret = secret;
        self
    }

    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        if let Ok(client) = reqwest::Client::builder().timeout(timeout).build() {
            self.client = client;
        }
        self
    }

    /// Exchange an authorization code (with its PKCE verifier) for tokens.
    #[tracing::instrument(skip(self, code, code_verifier), level = "info")]
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, AuthError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        self.post_form(&form)
            .await
            .map_err(AuthError::AuthorizationFailed)
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<TokenGrant, String> {
        let response = self
            .client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| format!("token request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(format!("token endpoint returned {}: {}", status, error_text));
        }

        let received_at = Utc::now();
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| format!("failed to parse token response: {}", e))?;

        if body.access_token.trim().is_empty() {
            return Err("token response carried an empty access token".to_string());
        }

        body.into_grant(received_at)
    }
}

impl TokenRefresher for TokenEndpointClient {
    #[tracing::instrument(skip(self, refresh_token), level = "info")]
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        self.post_form(&form).await.map_err(AuthError::RefreshFailed)
    }
}
