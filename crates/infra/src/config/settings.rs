//! Application auth settings and their validation

use std::collections::BTreeMap;
use std::time::Duration;

use loopauth_common::auth::{OAuthConfig, TokenManagerOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default keychain service name
pub const DEFAULT_KEYCHAIN_SERVICE: &str = "LoopAuth.desktop";

/// Default secure store record name
pub const DEFAULT_TOKEN_RECORD: &str = "oauth.token";

/// Configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is not set
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    /// Value present but unusable
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Setting or variable name
        key: String,
        /// What is wrong with it
        message: String,
    },

    /// Explicit config path does not exist, or nothing was found by probing
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Config file could not be read
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    /// Config file contents did not parse
    #[error("Invalid {format} format: {message}")]
    Parse {
        /// `toml` or `json`
        format: &'static str,
        /// Parser message
        message: String,
    },

    /// File extension is neither `.toml` nor `.json`
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string(), "profile".to_string(), "offline_access".to_string()]
}

fn default_callback_timeout_secs() -> u64 {
    300
}

fn default_refresh_margin_secs() -> u64 {
    120
}

fn default_keychain_service() -> String {
    DEFAULT_KEYCHAIN_SERVICE.to_string()
}

fn default_token_record() -> String {
    DEFAULT_TOKEN_RECORD.to_string()
}

/// Everything needed to wire a token manager for one OAuth client
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSettings {
    /// OAuth client ID
    pub client_id: String,

    /// Only for confidential clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Browser-facing authorization endpoint
    pub authorization_endpoint: String,

    /// Token endpoint
    pub token_endpoint: String,

    /// Registered loopback redirect URI (`http` only)
    pub redirect_uri: String,

    /// Requested scopes
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// API audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,

    /// Seconds to wait for the redirect
    #[serde(default = "default_callback_timeout_secs")]
    pub callback_timeout_secs: u64,

    /// Seconds before expiry the refresh timer fires
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,

    /// Keychain service the token record is stored under
    #[serde(default = "default_keychain_service")]
    pub keychain_service: String,

    /// Record name within the keychain service
    #[serde(default = "default_token_record")]
    pub token_record_name: String,

    /// Extra authorization request parameters
    #[serde(default)]
    pub extra_authorize_params: BTreeMap<String, String>,

    /// Extra token request parameters
    #[serde(default)]
    pub extra_token_params: BTreeMap<String, String>,
}

impl AuthSettings {
    /// Settings for a public client with defaults for everything optional
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            redirect_uri: redirect_uri.into(),
            scopes: default_scopes(),
            audience: None,
            callback_timeout_secs: default_callback_timeout_secs(),
            refresh_margin_secs: default_refresh_margin_secs(),
            keychain_service: default_keychain_service(),
            token_record_name: default_token_record(),
            extra_authorize_params: BTreeMap::new(),
            extra_token_params: BTreeMap::new(),
        }
    }

    /// Check the settings can drive a flow
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(invalid("client_id", "must not be empty"));
        }

        parse_url("authorization_endpoint", &self.authorization_endpoint)?;
        parse_url("token_endpoint", &self.token_endpoint)?;

        let redirect = parse_url("redirect_uri", &self.redirect_uri)?;
        if redirect.scheme() != "http" {
            return Err(invalid("redirect_uri", "loopback redirects must use http"));
        }
        if redirect.host().is_none() {
            return Err(invalid("redirect_uri", "missing host"));
        }

        if self.callback_timeout_secs == 0 {
            return Err(invalid("callback_timeout_secs", "must be greater than zero"));
        }
        if self.token_record_name.is_empty() {
            return Err(invalid("token_record_name", "must not be empty"));
        }

        Ok(())
    }

    /// Provider configuration for the flow and the token client
    #[must_use]
    pub fn to_oauth_config(&self) -> OAuthConfig {
        let mut config = OAuthConfig::new(
            self.client_id.clone(),
            self.authorization_endpoint.clone(),
            self.token_endpoint.clone(),
            self.redirect_uri.clone(),
            self.scopes.clone(),
        );
        config.client_secret.clone_from(&self.client_secret);
        config.audience.clone_from(&self.audience);
        config.extra_authorize_params =
            self.extra_authorize_params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        config.extra_token_params =
            self.extra_token_params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        config
    }

    /// Token manager tuning derived from these settings
    #[must_use]
    pub fn token_manager_options(&self) -> TokenManagerOptions {
        TokenManagerOptions {
            record_name: self.token_record_name.clone(),
            safety_margin: Duration::from_secs(self.refresh_margin_secs),
        }
    }

    /// Redirect wait bound
    #[must_use]
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("audience", &self.audience)
            .field("callback_timeout_secs", &self.callback_timeout_secs)
            .field("refresh_margin_secs", &self.refresh_margin_secs)
            .field("keychain_service", &self.keychain_service)
            .field("token_record_name", &self.token_record_name)
            .finish_non_exhaustive()
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue { key: key.to_string(), message: message.to_string() }
}

fn parse_url(key: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| invalid(key, &format!("{value}: {e}")))
}
