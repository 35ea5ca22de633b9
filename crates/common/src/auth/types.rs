//! OAuth token types and provider configuration
//!
//! [`Token`] is the immutable value the rest of the crate passes around.
//! [`TokenResponse`] is the wire shape a token endpoint returns, and
//! [`CachedTokenRecord`] is what lands in the secure store.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default token type when a provider leaves it out
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Longest lifetime accepted from a provider or the cache (ten years)
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// OAuth access credential with its lifetime
///
/// Never mutated after construction. A refresh produces a new `Token` that
/// supersedes the old one. Equality compares every field.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Access credential for API calls
    pub access_token: String,

    /// Token kind, normally "Bearer"
    pub token_type: String,

    /// Lifetime in seconds, counted from `created_at`
    pub expires_in: i64,

    /// Long-lived credential used to renew without user interaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// When this token was received
    pub created_at: DateTime<Utc>,
}

impl Token {
    /// Create a token received at `created_at`
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        expires_in: i64,
        refresh_token: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            expires_in,
            refresh_token,
            created_at,
        }
    }

    /// Wrap a token endpoint response received at `now`
    #[must_use]
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        let token_type = if response.token_type.is_empty() {
            DEFAULT_TOKEN_TYPE.to_string()
        } else {
            response.token_type
        };

        Self {
            access_token: response.access_token,
            token_type,
            expires_in: response.expires_in.min(MAX_TOKEN_LIFETIME_SECS),
            refresh_token: response.refresh_token,
            created_at: now,
        }
    }

    /// Wrap a refresh response, keeping the previous refresh credential when
    /// the provider does not rotate it
    #[must_use]
    pub fn from_refresh(response: TokenResponse, previous: &Self, now: DateTime<Utc>) -> Self {
        let mut token = Self::from_response(response, now);
        if token.refresh_token.is_none() {
            token.refresh_token.clone_from(&previous.refresh_token);
        }
        token
    }

    /// Absolute expiry instant (`created_at + expires_in`)
    ///
    /// Saturates at the ends of the representable range instead of
    /// overflowing, so a hostile lifetime reads as "never" or "long ago".
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        Duration::try_seconds(self.expires_in)
            .and_then(|lifetime| self.created_at.checked_add_signed(lifetime))
            .unwrap_or(if self.expires_in < 0 {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            })
    }

    /// Whether `expires_in` is within [`MAX_TOKEN_LIFETIME_SECS`]
    #[must_use]
    pub fn has_plausible_lifetime(&self) -> bool {
        self.expires_in <= MAX_TOKEN_LIFETIME_SECS
    }

    /// `true` once `created_at + expires_in <= now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }

    /// Expiry check against the system clock
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Seconds left until expiry (negative once expired)
    #[must_use]
    pub fn seconds_until_expiry_at(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at() - now).num_seconds()
    }

    /// Whether a refresh credential is available
    #[must_use]
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Token endpoint response (RFC 6749 §5.1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Issued access credential
    pub access_token: String,

    /// Token kind; some providers omit it
    #[serde(default)]
    pub token_type: String,

    /// Lifetime in seconds
    pub expires_in: i64,

    /// Refresh credential, when issued or rotated
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Server-side issue time, informational only; lifetimes are measured
    /// from local receipt
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
}

/// Persisted form of a [`Token`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedTokenRecord {
    /// Record format version
    pub version: u32,

    /// The cached token
    #[serde(flatten)]
    pub token: Token,
}

impl CachedTokenRecord {
    /// Current record format
    pub const VERSION: u32 = 1;
}

impl From<&Token> for CachedTokenRecord {
    fn from(token: &Token) -> Self {
        Self { version: Self::VERSION, token: token.clone() }
    }
}

impl From<CachedTokenRecord> for Token {
    fn from(record: CachedTokenRecord) -> Self {
        record.token
    }
}

/// Authorization code plus the values the token endpoint needs to redeem it
#[derive(Clone)]
pub struct CodeExchange {
    /// Code delivered by the redirect
    pub code: String,

    /// Redirect URI the code was issued for
    pub redirect_uri: String,

    /// PKCE verifier matching the challenge sent with the authorization request
    pub code_verifier: String,
}

impl fmt::Debug for CodeExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeExchange")
            .field("code", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("code_verifier", &"<redacted>")
            .finish()
    }
}

/// OAuth provider configuration
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// OAuth client ID
    pub client_id: String,

    /// Confidential clients only; desktop apps normally leave this empty
    pub client_secret: Option<String>,

    /// Browser-facing authorization endpoint
    pub authorization_endpoint: String,

    /// Token endpoint for code exchange and refresh
    pub token_endpoint: String,

    /// Pre-registered loopback redirect URI
    pub redirect_uri: String,

    /// Scopes to request
    pub scopes: Vec<String>,

    /// API audience, used by some providers like Auth0
    pub audience: Option<String>,

    /// Provider-specific authorization parameters (e.g. `access_type=offline`)
    pub extra_authorize_params: Vec<(String, String)>,

    /// Provider-specific token endpoint parameters
    pub extra_token_params: Vec<(String, String)>,
}

impl OAuthConfig {
    /// Create a configuration for a public client
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
            audience: None,
            extra_authorize_params: Vec::new(),
            extra_token_params: Vec::new(),
        }
    }

    /// Get scopes as space-separated string
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// OAuth error response from authorization server (RFC 6749 §5.2)
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthError {
    /// Error code such as `invalid_grant`
    pub error: String,

    /// Human-readable detail
    pub error_description: Option<String>,
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(desc) => write!(f, "{}: {}", self.error, desc),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for OAuthError {}
