//! Token endpoint client
//!
//! Redeems authorization codes and refresh credentials with form-encoded
//! POSTs (RFC 6749 §4.1.3 and §6). Non-success responses are decoded as an
//! OAuth error body when possible.

use std::time::Duration;

use async_trait::async_trait;
use loopauth_common::auth::{
    CodeExchange, OAuthClientError, OAuthConfig, OAuthError, TokenExchangeClient, TokenResponse,
};
use reqwest::header::ACCEPT;
use reqwest::Client;
use tracing::{debug, warn};

/// Request timeout for token endpoint calls
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Set to bypass system proxies (useful behind corporate proxies and in tests)
pub const DISABLE_PROXY_ENV: &str = "LOOPAUTH_DISABLE_PROXY";

/// reqwest-backed [`TokenExchangeClient`]
#[derive(Debug, Clone)]
pub struct OAuthClient {
    config: OAuthConfig,
    http: Client,
}

impl OAuthClient {
    /// Create a client with a 30 second request timeout
    ///
    /// Honors [`DISABLE_PROXY_ENV`].
    ///
    /// # Errors
    /// Returns `OAuthClientError::ConfigError` if the HTTP client cannot be
    /// built
    pub fn new(config: OAuthConfig) -> Result<Self, OAuthClientError> {
        let builder = Client::builder().timeout(REQUEST_TIMEOUT);
        let builder = if std::env::var_os(DISABLE_PROXY_ENV).is_some() {
            builder.no_proxy()
        } else {
            builder
        };
        let http = builder
            .build()
            .map_err(|e| OAuthClientError::ConfigError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, http })
    }

    /// Create a client around an existing `reqwest::Client`
    #[must_use]
    pub fn with_http_client(config: OAuthConfig, http: Client) -> Self {
        Self { config, http }
    }

    /// Get a reference to the OAuth configuration
    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    fn with_client_params(&self, mut params: Vec<(String, String)>) -> Vec<(String, String)> {
        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret".to_string(), secret.clone()));
        }
        params.extend(self.config.extra_token_params.iter().cloned());
        params
    }

    async fn post_token_request(
        &self,
        grant_type: &str,
        params: &[(String, String)],
    ) -> Result<TokenResponse, OAuthClientError> {
        let response = self
            .http
            .post(&self.config.token_endpoint)
            .header(ACCEPT, "application/json")
            .form(params)
            .send()
            .await
            .map_err(|e| OAuthClientError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return match serde_json::from_str::<OAuthError>(&body) {
                Ok(error) => {
                    warn!(grant_type, status = status.as_u16(), error = %error.error, "Token endpoint rejected request");
                    Err(OAuthClientError::OAuthError(error))
                }
                Err(_) => {
                    warn!(grant_type, status = status.as_u16(), "Token endpoint returned unexpected status");
                    Err(OAuthClientError::UnexpectedStatus { status: status.as_u16() })
                }
            };
        }

        let token: TokenResponse =
            response.json().await.map_err(|e| OAuthClientError::ParseError(e.to_string()))?;
        debug!(grant_type, expires_in = token.expires_in, "Token endpoint request succeeded");
        Ok(token)
    }
}

#[async_trait]
impl TokenExchangeClient for OAuthClient {
    async fn exchange_code(
        &self,
        request: &CodeExchange,
    ) -> Result<TokenResponse, OAuthClientError> {
        let params = self.with_client_params(vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("code".to_string(), request.code.clone()),
            ("redirect_uri".to_string(), request.redirect_uri.clone()),
            ("code_verifier".to_string(), request.code_verifier.clone()),
        ]);

        self.post_token_request("authorization_code", &params).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, OAuthClientError> {
        if refresh_token.is_empty() {
            return Err(OAuthClientError::NoRefreshToken);
        }

        let params = self.with_client_params(vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("refresh_token".to_string(), refresh_token.to_string()),
        ]);

        self.post_token_request("refresh_token", &params).await
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for oauth::client.
    use super::*;

    fn test_config() -> OAuthConfig {
        let mut config = OAuthConfig::new(
            "test_client_id",
            "https://auth.example.com/authorize",
            "http://127.0.0.1:9/token",
            "http://127.0.0.1:8765/callback",
            vec!["openid".to_string()],
        );
        config.client_secret = Some("shh".to_string());
        config.extra_token_params = vec![("resource".to_string(), "api".to_string())];
        config
    }

    /// Validates an empty refresh credential short-circuits.
    ///
    /// Assertions:
    /// - Ensures the result is `OAuthClientError::NoRefreshToken`.
    #[tokio::test]
    async fn test_refresh_requires_token() {
        let client = OAuthClient::with_http_client(test_config(), Client::new());

        let result = client.refresh_token("").await;
        assert!(matches!(result, Err(OAuthClientError::NoRefreshToken)));
    }

    /// Validates confidential-client parameters are appended.
    ///
    /// Assertions:
    /// - Confirms `client_secret` and extra token params follow the grant
    ///   params.
    #[test]
    fn test_client_params_appended() {
        let client = OAuthClient::with_http_client(test_config(), Client::new());
        let params = client.with_client_params(vec![("grant_type".into(), "x".into())]);

        assert_eq!(
            params,
            vec![
                ("grant_type".to_string(), "x".to_string()),
                ("client_secret".to_string(), "shh".to_string()),
                ("resource".to_string(), "api".to_string()),
            ]
        );
    }

    /// Validates `OAuthClient::config` accessor.
    ///
    /// Assertions:
    /// - Confirms the client id round-trips.
    #[test]
    fn test_config_accessor() {
        let client = OAuthClient::with_http_client(test_config(), Client::new());
        assert_eq!(client.config().client_id, "test_client_id");
    }
}
