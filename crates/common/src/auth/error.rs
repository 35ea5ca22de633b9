//! Error types for the auth subsystem

use std::time::Duration;

use thiserror::Error;

use super::types::OAuthError;

/// Token endpoint failures
#[derive(Debug, Error)]
pub enum OAuthClientError {
    /// HTTP request failed (connect, timeout, TLS)
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// OAuth server returned an error body
    #[error("OAuth error: {0}")]
    OAuthError(OAuthError),

    /// Server returned a non-success status without a parsable error body
    #[error("Token endpoint returned status {status}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
    },

    /// Failed to parse response
    #[error("Parse error: {0}")]
    ParseError(String),

    /// No refresh token available
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Secure store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be reached or refused the operation
    #[error("Secure store access failed: {0}")]
    AccessFailed(String),

    /// Stored value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Relay channel failures
#[derive(Debug, Error)]
pub enum RelayError {
    /// A receiver is already waiting on this channel id
    #[error("Relay channel {0} already has a receiver")]
    DuplicateChannel(String),

    /// No receiver is waiting, or a producer already connected
    #[error("Relay channel {0} not found")]
    NotFound(String),

    /// Nothing arrived before the deadline
    #[error("Timed out after {0:?} waiting for relay payload")]
    Timeout(Duration),

    /// Producer went away before completing its frame
    #[error("Relay producer disconnected before sending a payload")]
    Disconnected,

    /// Frame could not be written or read
    #[error("Relay I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload was not valid UTF-8
    #[error("Relay payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Browser launch failure
#[derive(Debug, Error)]
#[error("Browser launch failed: {0}")]
pub struct BrowserError(pub String);

/// Why an interactive authorization attempt failed
#[derive(Debug, Error)]
pub enum AuthFlowError {
    /// Another attempt already owns the redirect listener
    #[error("An authorization flow is already active")]
    AlreadyActive,

    /// Caller cancelled the attempt
    #[error("Authorization flow cancelled")]
    Cancelled,

    /// No callback arrived in time
    #[error("Timed out after {0:?} waiting for the authorization callback")]
    Timeout(Duration),

    /// Returned state did not match the one sent
    #[error("State mismatch in authorization callback")]
    StateMismatch,

    /// Provider redirected back with `error`
    #[error("Authorization denied by provider: {error}")]
    Provider {
        /// OAuth error code
        error: String,
        /// Optional detail
        description: Option<String>,
    },

    /// Callback lacked the required parameters
    #[error("Malformed authorization callback: {0}")]
    MalformedCallback(String),

    /// Redirect listener could not start
    #[error("Callback listener failed: {0}")]
    Listener(String),

    /// Browser could not be opened
    #[error("Failed to open browser: {0}")]
    Browser(String),

    /// Relay between listener and flow failed
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Code exchange failed
    #[error("Code exchange failed: {0}")]
    Exchange(#[from] OAuthClientError),
}

impl AuthFlowError {
    /// Whether the failure came from cancellation rather than a real error
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
