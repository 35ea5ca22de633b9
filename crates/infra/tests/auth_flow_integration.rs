//! Integration tests for the interactive flow coordinator.
//!
//! The browser is a `MockBrowser` whose hook plays the user: it reads the
//! authorization URL and requests the redirect URI the way a provider would.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use loopauth_common::auth::pkce::generate_code_challenge;
use loopauth_common::auth::{
    AuthFlowError, CachedTokenRecord, InteractiveAuthorizer, OAuthConfig, TokenManager,
    TokenManagerOptions,
};
use loopauth_common::testing::{token_response, MockBrowser, MockClock, MockSecureStore, MockTokenClient};
use loopauth_common::SecureStoreExt;
use loopauth_infra::oauth::{AuthFlowCoordinator, FlowState};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use url::Url;

fn config() -> OAuthConfig {
    OAuthConfig::new(
        "test_client_id",
        "https://auth.example.com/authorize",
        "https://auth.example.com/oauth/token",
        "http://127.0.0.1:0/callback",
        vec!["openid".to_string(), "offline_access".to_string()],
    )
}

fn query_of(url: &str) -> HashMap<String, String> {
    Url::parse(url).expect("authorization URL").query_pairs().into_owned().collect()
}

/// Browser that answers the redirect with whatever `make_query` builds from
/// the `state` it was sent
fn redirecting_browser(make_query: fn(&str) -> String) -> Arc<MockBrowser> {
    Arc::new(MockBrowser::with_hook(move |auth_url| {
        let params = query_of(auth_url);
        let target = format!("{}?{}", params["redirect_uri"], make_query(&params["state"]));
        tokio::spawn(async move {
            let client = reqwest::Client::builder().no_proxy().build().expect("client");
            let _ = client.get(target).send().await;
        });
    }))
}

fn coordinator(client: &Arc<MockTokenClient>, browser: &Arc<MockBrowser>) -> AuthFlowCoordinator {
    AuthFlowCoordinator::new(config(), client.clone(), browser.clone())
        .with_callback_timeout(Duration::from_secs(5))
}

/// Validates a complete successful attempt.
///
/// Assertions:
/// - Confirms the token comes from the exchange and is stamped with the clock.
/// - Confirms the exchange used the effective redirect URI and the verifier
///   matching the challenge in the URL.
/// - Confirms the final state is `Succeeded`.
#[tokio::test]
async fn test_authorize_success() {
    let client = Arc::new(MockTokenClient::new());
    client.push_exchange(Ok(token_response("access-1", 3600, Some("refresh-1"))));
    let browser = redirecting_browser(|state| format!("code=auth-code&state={state}"));
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(MockClock::new(start));
    let flow = coordinator(&client, &browser).with_clock(clock);

    let token = flow.authorize(&CancellationToken::new()).await.expect("token");

    assert_eq!(token.access_token, "access-1");
    assert_eq!(token.created_at, start);
    assert_eq!(flow.state(), FlowState::Succeeded);

    let opened = browser.opened();
    assert_eq!(opened.len(), 1);
    let params = query_of(&opened[0]);
    let exchanges = client.exchanges();
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].code, "auth-code");
    assert_eq!(exchanges[0].redirect_uri, params["redirect_uri"]);
    assert_ne!(exchanges[0].redirect_uri, "http://127.0.0.1:0/callback");
    assert_eq!(generate_code_challenge(&exchanges[0].code_verifier), params["code_challenge"]);
}

/// Validates a caller-supplied state is sent and enforced.
///
/// Assertions:
/// - Confirms the URL carries the supplied state.
#[tokio::test]
async fn test_authorize_with_supplied_state() {
    let client = Arc::new(MockTokenClient::new());
    client.push_exchange(Ok(token_response("access", 3600, None)));
    let browser = redirecting_browser(|state| format!("code=c&state={state}"));
    let flow = coordinator(&client, &browser);

    flow.authorize_with_state("fixed-state".to_string(), &CancellationToken::new())
        .await
        .expect("token");

    assert_eq!(query_of(&browser.opened()[0])["state"], "fixed-state");
}

/// Validates the state check.
///
/// Assertions:
/// - Ensures a different state fails with `StateMismatch`.
/// - Ensures no exchange is attempted.
#[tokio::test]
async fn test_state_mismatch_rejected() {
    let client = Arc::new(MockTokenClient::new());
    let browser = redirecting_browser(|_| "code=c&state=forged".to_string());
    let flow = coordinator(&client, &browser);

    let result = flow.authorize(&CancellationToken::new()).await;

    assert!(matches!(result, Err(AuthFlowError::StateMismatch)));
    assert_eq!(client.exchange_calls(), 0);
    assert_eq!(flow.state(), FlowState::Failed);
}

/// Validates provider denials.
///
/// Assertions:
/// - Ensures the error carries the provider's code and description.
#[tokio::test]
async fn test_provider_error() {
    let client = Arc::new(MockTokenClient::new());
    let browser = redirecting_browser(|state| {
        format!("error=access_denied&error_description=denied&state={state}")
    });
    let flow = coordinator(&client, &browser);

    let result = flow.authorize(&CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(AuthFlowError::Provider { ref error, description: Some(ref d) }) if error == "access_denied" && d == "denied"
    ));
    assert_eq!(client.exchange_calls(), 0);
}

/// Validates a redirect missing both code and error.
///
/// Assertions:
/// - Ensures the attempt fails fast with `MalformedCallback`.
#[tokio::test]
async fn test_malformed_callback() {
    let client = Arc::new(MockTokenClient::new());
    let browser = redirecting_browser(|state| format!("state={state}"));
    let flow = coordinator(&client, &browser);

    let result = flow.authorize(&CancellationToken::new()).await;
    assert!(matches!(result, Err(AuthFlowError::MalformedCallback(_))));
}

/// Validates a redirect the listener cannot decode.
///
/// Assertions:
/// - Ensures a duplicated `state` key fails fast with `MalformedCallback`
///   instead of waiting for the timeout.
/// - Ensures no exchange is attempted.
#[tokio::test]
async fn test_undecodable_callback_fails_fast() {
    let client = Arc::new(MockTokenClient::new());
    let browser = redirecting_browser(|state| format!("code=c&state={state}&state=other"));
    let flow = coordinator(&client, &browser);

    let result = flow.authorize(&CancellationToken::new()).await;

    assert!(matches!(result, Err(AuthFlowError::MalformedCallback(_))));
    assert_eq!(client.exchange_calls(), 0);
}

/// Validates the callback wait is bounded.
///
/// Assertions:
/// - Ensures silence ends in `Timeout`.
#[tokio::test]
async fn test_callback_timeout() {
    let client = Arc::new(MockTokenClient::new());
    let browser = Arc::new(MockBrowser::new());
    let flow = coordinator(&client, &browser).with_callback_timeout(Duration::from_millis(200));

    let result = flow.authorize(&CancellationToken::new()).await;

    assert!(matches!(result, Err(AuthFlowError::Timeout(d)) if d == Duration::from_millis(200)));
    assert_eq!(browser.open_count(), 1);
}

/// Validates cancellation while waiting for the redirect.
///
/// Assertions:
/// - Ensures the result is `Cancelled`.
/// - Confirms the state ends as `Failed`.
#[tokio::test]
async fn test_cancel_while_awaiting_callback() {
    let client = Arc::new(MockTokenClient::new());
    let browser = Arc::new(MockBrowser::new());
    let flow = Arc::new(coordinator(&client, &browser));
    let cancel = CancellationToken::new();

    let mut states = flow.subscribe_state();
    let task = {
        let flow = flow.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { flow.authorize(&cancel).await })
    };

    states.wait_for(|s| *s == FlowState::AwaitingCallback).await.unwrap();
    cancel.cancel();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(AuthFlowError::Cancelled)));
    assert_eq!(flow.state(), FlowState::Failed);
}

/// Validates an already-cancelled token never opens the browser.
///
/// Assertions:
/// - Ensures the result is `Cancelled` and the browser was untouched.
#[tokio::test]
async fn test_cancelled_before_start() {
    let client = Arc::new(MockTokenClient::new());
    let browser = Arc::new(MockBrowser::new());
    let flow = coordinator(&client, &browser);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = flow.authorize(&cancel).await;

    assert!(matches!(result, Err(AuthFlowError::Cancelled)));
    assert_eq!(browser.open_count(), 0);
}

/// Validates one attempt at a time.
///
/// Assertions:
/// - Ensures a second attempt fails with `AlreadyActive` without opening a
///   second browser page.
#[tokio::test]
async fn test_second_attempt_rejected_while_active() {
    let client = Arc::new(MockTokenClient::new());
    let browser = Arc::new(MockBrowser::new());
    let flow = Arc::new(coordinator(&client, &browser));
    let cancel = CancellationToken::new();

    let mut states = flow.subscribe_state();
    let first = {
        let flow = flow.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { flow.authorize(&cancel).await })
    };
    states.wait_for(|s| *s == FlowState::AwaitingCallback).await.unwrap();

    let second = flow.authorize(&CancellationToken::new()).await;
    assert!(matches!(second, Err(AuthFlowError::AlreadyActive)));
    assert_eq!(browser.open_count(), 1);

    cancel.cancel();
    assert!(first.await.unwrap().is_err());
}

/// Validates browser launch failure.
///
/// Assertions:
/// - Ensures the attempt fails with `Browser`.
#[tokio::test]
async fn test_browser_failure() {
    let client = Arc::new(MockTokenClient::new());
    let browser = Arc::new(MockBrowser::failing());
    let flow = coordinator(&client, &browser);

    let result = flow.authorize(&CancellationToken::new()).await;
    assert!(matches!(result, Err(AuthFlowError::Browser(_))));
}

/// Validates listener configuration errors surface before the browser.
///
/// Assertions:
/// - Ensures an https redirect fails with `Listener` and no page is opened.
#[tokio::test]
async fn test_listener_failure() {
    let client = Arc::new(MockTokenClient::new());
    let browser = Arc::new(MockBrowser::new());
    let mut bad = config();
    bad.redirect_uri = "https://127.0.0.1:0/callback".to_string();
    let flow = AuthFlowCoordinator::new(bad, client, browser.clone());

    let result = flow.authorize(&CancellationToken::new()).await;

    assert!(matches!(result, Err(AuthFlowError::Listener(_))));
    assert_eq!(browser.open_count(), 0);
}

/// Validates exchange failures are reported.
///
/// Assertions:
/// - Ensures the error is `Exchange`.
#[tokio::test]
async fn test_exchange_failure() {
    let client = Arc::new(MockTokenClient::new());
    let browser = redirecting_browser(|state| format!("code=c&state={state}"));
    let flow = coordinator(&client, &browser);

    let result = flow.authorize(&CancellationToken::new()).await;
    assert!(matches!(result, Err(AuthFlowError::Exchange(_))));
}

/// Validates the coordinator as the token manager's interactive step.
///
/// Assertions:
/// - Confirms the callback receives the exchanged token.
/// - Confirms the token was cached in the store.
#[tokio::test]
async fn test_token_manager_uses_coordinator() {
    let store = Arc::new(MockSecureStore::new());
    let client = Arc::new(MockTokenClient::new());
    client.push_exchange(Ok(token_response("interactive", 3600, Some("r"))));
    let browser = redirecting_browser(|state| format!("code=c&state={state}"));
    let flow = Arc::new(coordinator(&client, &browser));

    let manager = TokenManager::new(store.clone(), client.clone(), flow, TokenManagerOptions::default());

    let (tx, rx) = oneshot::channel();
    assert!(manager.begin_get_token(
        CancellationToken::new(),
        Some(Box::new(move |token| {
            let _ = tx.send(token);
        })),
    ));

    let token = tokio::time::timeout(Duration::from_secs(10), rx).await.unwrap().unwrap().expect("token");
    assert_eq!(token.access_token, "interactive");
    assert_eq!(manager.token(), Some(token.clone()));

    let cached: Option<CachedTokenRecord> = store.load("oauth.token").await.unwrap();
    assert_eq!(cached.map(|r| r.token), Some(token));
    assert_eq!(browser.open_count(), 1);
}
