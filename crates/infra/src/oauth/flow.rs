//! Interactive authorization code flow over a loopback redirect
//!
//! ```text
//! Idle → AwaitingUserConsent → AwaitingCallback → ExchangingCode → Succeeded
//!              │                     │                  │
//!              └─────────────────────┴──────────────────┴──────→ Failed
//! ```
//!
//! Each attempt generates PKCE and `state`, starts the redirect listener and
//! the relay receiver, then opens the browser. The callback reaches the
//! coordinator through the relay, never through a direct call from the
//! listener's tasks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loopauth_common::auth::{
    generate_state, validate_state, AuthFlowError, BrowserLauncher, ChannelId, CodeExchange,
    InteractiveAuthorizer, OAuthConfig, PkceChallenge, RelayError, RelayHub, Token,
    TokenExchangeClient,
};
use loopauth_common::time::{Clock, SystemClock};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::callback::{CallbackListener, PendingCallbackResult, MALFORMED_CALLBACK_ERROR};

/// How long to wait for the redirect unless configured otherwise
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Observable progress of the current (or last) attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// No attempt has run yet
    Idle,
    /// Listener is up, browser is being opened
    AwaitingUserConsent,
    /// Waiting for the redirect
    AwaitingCallback,
    /// Redeeming the authorization code
    ExchangingCode,
    /// Last attempt produced a token
    Succeeded,
    /// Last attempt failed or was cancelled
    Failed,
}

/// Build the browser-facing authorization URL
///
/// Parameters: `response_type=code`, `client_id`, `redirect_uri`, `scope`,
/// `state`, `code_challenge`, `code_challenge_method=S256`, then `audience`
/// when configured and any extra provider parameters.
#[must_use]
pub fn build_authorization_url(
    config: &OAuthConfig,
    redirect_uri: &str,
    state: &str,
    pkce: &PkceChallenge,
) -> String {
    let mut params = vec![
        ("response_type".to_string(), "code".to_string()),
        ("client_id".to_string(), config.client_id.clone()),
        ("redirect_uri".to_string(), redirect_uri.to_string()),
        ("scope".to_string(), config.scope_string()),
        ("state".to_string(), state.to_string()),
        ("code_challenge".to_string(), pkce.code_challenge.clone()),
        ("code_challenge_method".to_string(), pkce.challenge_method().to_string()),
    ];

    if let Some(audience) = &config.audience {
        params.push(("audience".to_string(), audience.clone()));
    }

    params.extend(config.extra_authorize_params.iter().cloned());

    let query_string = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let separator = if config.authorization_endpoint.contains('?') { '&' } else { '?' };
    format!("{}{separator}{query_string}", config.authorization_endpoint)
}

/// Runs interactive authorizations, one at a time
pub struct AuthFlowCoordinator {
    config: OAuthConfig,
    client: Arc<dyn TokenExchangeClient>,
    browser: Arc<dyn BrowserLauncher>,
    relay: RelayHub,
    clock: Arc<dyn Clock>,
    callback_timeout: Duration,
    active: Mutex<()>,
    state: watch::Sender<FlowState>,
}

impl AuthFlowCoordinator {
    /// Create a coordinator with the default callback timeout
    #[must_use]
    pub fn new(
        config: OAuthConfig,
        client: Arc<dyn TokenExchangeClient>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let (state, _) = watch::channel(FlowState::Idle);
        Self {
            config,
            client,
            browser,
            relay: RelayHub::new(),
            clock: Arc::new(SystemClock),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            active: Mutex::new(()),
            state,
        }
    }

    /// Override how long to wait for the redirect
    #[must_use]
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Stamp tokens with an injected clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a relay hub with other components
    #[must_use]
    pub fn with_relay(mut self, relay: RelayHub) -> Self {
        self.relay = relay;
        self
    }

    /// Current flow state
    #[must_use]
    pub fn state(&self) -> FlowState {
        *self.state.borrow()
    }

    /// Watch flow state transitions
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<FlowState> {
        self.state.subscribe()
    }

    /// Configured callback timeout
    #[must_use]
    pub fn callback_timeout(&self) -> Duration {
        self.callback_timeout
    }

    /// Run one attempt with a caller-supplied `state`
    ///
    /// # Errors
    /// - `AuthFlowError::AlreadyActive` if another attempt is outstanding
    /// - `AuthFlowError::Cancelled` if `cancel` fires first
    /// - any other `AuthFlowError` variant describing why the attempt failed
    pub async fn authorize_with_state(
        &self,
        state: String,
        cancel: &CancellationToken,
    ) -> Result<Token, AuthFlowError> {
        let Ok(_active) = self.active.try_lock() else {
            warn!(event = "flow.already_active", "Rejected concurrent authorization attempt");
            return Err(AuthFlowError::AlreadyActive);
        };

        let result = self.run(&state, cancel).await;
        match &result {
            Ok(token) => {
                self.transition(FlowState::Succeeded);
                info!(event = "flow.succeeded", expires_in = token.expires_in, "Authorization succeeded");
            }
            Err(err) if err.is_cancelled() => {
                self.transition(FlowState::Failed);
                info!(event = "flow.cancelled", "Authorization cancelled");
            }
            Err(err) => {
                self.transition(FlowState::Failed);
                warn!(event = "flow.failed", error = %err, "Authorization failed");
            }
        }
        result
    }

    async fn run(&self, state: &str, cancel: &CancellationToken) -> Result<Token, AuthFlowError> {
        self.transition(FlowState::AwaitingUserConsent);

        let pkce = PkceChallenge::generate();
        let channel_id = ChannelId::new();
        let receiver = self.relay.create_receiver(channel_id.clone())?;

        let listener =
            CallbackListener::start(&self.config.redirect_uri, self.relay.clone(), channel_id)
                .await
                .map_err(|e| AuthFlowError::Listener(e.to_string()))?;
        let redirect_uri = listener.redirect_uri().to_string();

        if cancel.is_cancelled() {
            listener.stop().await;
            return Err(AuthFlowError::Cancelled);
        }

        let url = build_authorization_url(&self.config, &redirect_uri, state, &pkce);
        if let Err(err) = self.browser.open_url(&url) {
            listener.stop().await;
            return Err(AuthFlowError::Browser(err.to_string()));
        }
        debug!(event = "flow.browser_opened", redirect_uri = %redirect_uri, "Browser opened for consent");

        self.transition(FlowState::AwaitingCallback);
        let waited = tokio::select! {
            payload = receiver.wait_for_payload(self.callback_timeout) => Some(payload),
            () = cancel.cancelled() => None,
        };
        listener.stop().await;

        let payload = match waited {
            None => return Err(AuthFlowError::Cancelled),
            Some(Err(RelayError::Timeout(waited_for))) => {
                return Err(AuthFlowError::Timeout(waited_for))
            }
            Some(Err(err)) => return Err(err.into()),
            Some(Ok(payload)) => payload,
        };

        let code = classify_callback(&payload, state)?;

        if cancel.is_cancelled() {
            return Err(AuthFlowError::Cancelled);
        }

        self.transition(FlowState::ExchangingCode);
        let exchange = CodeExchange { code, redirect_uri, code_verifier: pkce.code_verifier };
        let response = tokio::select! {
            response = self.client.exchange_code(&exchange) => response?,
            () = cancel.cancelled() => return Err(AuthFlowError::Cancelled),
        };

        Ok(Token::from_response(response, self.clock.now()))
    }

    fn transition(&self, next: FlowState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(event = "flow.state", from = ?previous, to = ?next, "Flow state changed");
        }
    }
}

/// Turn a relayed payload into an authorization code or the reason there is
/// none
fn classify_callback(payload: &str, expected_state: &str) -> Result<String, AuthFlowError> {
    let callback: PendingCallbackResult = serde_json::from_str(payload)
        .map_err(|e| AuthFlowError::MalformedCallback(format!("unreadable callback payload: {e}")))?;

    if let Some(error) = callback.error.filter(|e| !e.is_empty()) {
        if error == MALFORMED_CALLBACK_ERROR {
            return Err(AuthFlowError::MalformedCallback(
                callback
                    .error_description
                    .unwrap_or_else(|| "redirect carried neither code nor error".to_string()),
            ));
        }
        return Err(AuthFlowError::Provider { error, description: callback.error_description });
    }

    match callback.state.as_deref() {
        Some(returned) if validate_state(expected_state, returned) => {}
        _ => return Err(AuthFlowError::StateMismatch),
    }

    callback
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AuthFlowError::MalformedCallback("missing authorization code".to_string()))
}

#[async_trait]
impl InteractiveAuthorizer for AuthFlowCoordinator {
    async fn authorize(&self, cancel: &CancellationToken) -> Result<Token, AuthFlowError> {
        self.authorize_with_state(generate_state(), cancel).await
    }
}

impl std::fmt::Debug for AuthFlowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFlowCoordinator")
            .field("client_id", &self.config.client_id)
            .field("redirect_uri", &self.config.redirect_uri)
            .field("callback_timeout", &self.callback_timeout)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for oauth::flow.
    use url::Url;

    use super::*;

    fn test_config() -> OAuthConfig {
        let mut config = OAuthConfig::new(
            "test_client_id",
            "https://dev-test.us.auth0.com/authorize",
            "https://dev-test.us.auth0.com/oauth/token",
            "http://127.0.0.1:0/callback",
            vec!["openid".to_string(), "offline_access".to_string()],
        );
        config.audience = Some("https://api.example.com".to_string());
        config.extra_authorize_params = vec![("prompt".to_string(), "login".to_string())];
        config
    }

    /// Validates the authorization URL contents.
    ///
    /// Assertions:
    /// - Confirms every required parameter is present with the right value.
    /// - Confirms audience and extra params are included.
    /// - Ensures the verifier never appears in the URL.
    #[test]
    fn test_build_authorization_url() {
        let config = test_config();
        let pkce = PkceChallenge::generate();
        let url = build_authorization_url(&config, "http://127.0.0.1:5000/callback", "st4te", &pkce);

        assert!(url.starts_with("https://dev-test.us.auth0.com/authorize?"));
        let parsed = Url::parse(&url).unwrap();
        let query: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "test_client_id");
        assert_eq!(query["redirect_uri"], "http://127.0.0.1:5000/callback");
        assert_eq!(query["scope"], "openid offline_access");
        assert_eq!(query["state"], "st4te");
        assert_eq!(query["code_challenge"], pkce.code_challenge);
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["audience"], "https://api.example.com");
        assert_eq!(query["prompt"], "login");
        assert!(!url.contains(&pkce.code_verifier));
    }

    /// Validates callback classification.
    ///
    /// Assertions:
    /// - Confirms a matching state yields the code.
    /// - Ensures a missing or different state is a mismatch.
    /// - Ensures provider errors take precedence and keep the description.
    /// - Ensures the listener's malformed marker and garbage payloads are
    ///   malformed callbacks.
    #[test]
    fn test_classify_callback() {
        assert_eq!(classify_callback(r#"{"code":"c","state":"s"}"#, "s").unwrap(), "c");
        assert!(matches!(
            classify_callback(r#"{"code":"c","state":"x"}"#, "s"),
            Err(AuthFlowError::StateMismatch)
        ));
        assert!(matches!(classify_callback(r#"{"code":"c"}"#, "s"), Err(AuthFlowError::StateMismatch)));
        assert!(matches!(
            classify_callback(r#"{"error":"access_denied","error_description":"no","state":"s"}"#, "s"),
            Err(AuthFlowError::Provider { error, description: Some(d) }) if error == "access_denied" && d == "no"
        ));
        assert!(matches!(
            classify_callback(r#"{"error":"malformed_callback"}"#, "s"),
            Err(AuthFlowError::MalformedCallback(_))
        ));
        assert!(matches!(
            classify_callback(r#"{"error":"malformed_callback","error_description":"duplicate field"}"#, "s"),
            Err(AuthFlowError::MalformedCallback(reason)) if reason == "duplicate field"
        ));
        assert!(matches!(classify_callback("not json", "s"), Err(AuthFlowError::MalformedCallback(_))));
        assert!(matches!(
            classify_callback(r#"{"code":"","state":"s"}"#, "s"),
            Err(AuthFlowError::MalformedCallback(_))
        ));
    }
}
