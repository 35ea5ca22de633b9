//! Mock implementations of the collaborator traits
//!
//! All mocks are in-memory, record how they were called, and return scripted
//! results in FIFO order.

// Test mocks: errors are clearly indicated by their return types
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::auth::{
    AuthFlowError, BrowserError, BrowserLauncher, CodeExchange, InteractiveAuthorizer,
    OAuthClientError, SecureStore, StoreError, Token, TokenExchangeClient, TokenResponse,
};

/// Build a token endpoint response
#[must_use]
pub fn token_response(access_token: &str, expires_in: i64, refresh_token: Option<&str>) -> TokenResponse {
    TokenResponse {
        access_token: access_token.to_string(),
        token_type: "Bearer".to_string(),
        expires_in,
        refresh_token: refresh_token.map(str::to_string),
        issued_at: None,
    }
}

/// One recorded store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// `exists(name)`
    Exists(String),
    /// `load_raw(name)`
    Load(String),
    /// `save_raw(name, _)`
    Save(String),
    /// `delete(name)`
    Delete(String),
}

/// In-memory [`SecureStore`]
///
/// # Examples
///
/// ```
/// # #[cfg(feature = "test-utils")]
/// # {
/// use loopauth_common::testing::MockSecureStore;
///
/// let store = MockSecureStore::new();
/// store.insert_raw("oauth.token", "{}");
/// assert_eq!(store.raw("oauth.token").as_deref(), Some("{}"));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockSecureStore {
    data: Arc<Mutex<HashMap<String, String>>>,
    ops: Arc<Mutex<Vec<StoreOp>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MockSecureStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw value without recording an operation
    pub fn insert_raw(&self, name: &str, value: &str) {
        self.data.lock().insert(name.to_string(), value.to_string());
    }

    /// Current raw value
    pub fn raw(&self, name: &str) -> Option<String> {
        self.data.lock().get(name).cloned()
    }

    /// Whether a value is stored, without recording an operation
    pub fn contains(&self, name: &str) -> bool {
        self.data.lock().contains_key(name)
    }

    /// Every recorded call, in order
    pub fn operations(&self) -> Vec<StoreOp> {
        self.ops.lock().clone()
    }

    /// Number of `save_raw` calls
    pub fn save_count(&self) -> usize {
        self.ops.lock().iter().filter(|op| matches!(op, StoreOp::Save(_))).count()
    }

    /// Number of `delete` calls
    pub fn delete_count(&self) -> usize {
        self.ops.lock().iter().filter(|op| matches!(op, StoreOp::Delete(_))).count()
    }

    /// Make `save_raw` and `delete` fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn record(&self, op: StoreOp) {
        self.ops.lock().push(op);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::AccessFailed("mock store is read-only".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SecureStore for MockSecureStore {
    async fn exists(&self, name: &str) -> bool {
        self.record(StoreOp::Exists(name.to_string()));
        self.contains(name)
    }

    async fn load_raw(&self, name: &str) -> Result<Option<String>, StoreError> {
        self.record(StoreOp::Load(name.to_string()));
        Ok(self.raw(name))
    }

    async fn save_raw(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.record(StoreOp::Save(name.to_string()));
        self.check_writable()?;
        self.insert_raw(name, value);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.record(StoreOp::Delete(name.to_string()));
        self.check_writable()?;
        self.data.lock().remove(name);
        Ok(())
    }
}

type Scripted = Mutex<VecDeque<Result<TokenResponse, OAuthClientError>>>;

/// Scripted [`TokenExchangeClient`]
///
/// Unscripted calls fail with `OAuthClientError::RequestFailed`.
#[derive(Debug, Default)]
pub struct MockTokenClient {
    exchange_results: Scripted,
    refresh_results: Scripted,
    exchanges: Mutex<Vec<CodeExchange>>,
    refreshes: Mutex<Vec<String>>,
}

impl MockTokenClient {
    /// Create a client with nothing scripted
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next `exchange_code`
    pub fn push_exchange(&self, result: Result<TokenResponse, OAuthClientError>) {
        self.exchange_results.lock().push_back(result);
    }

    /// Queue the result of the next `refresh_token`
    pub fn push_refresh(&self, result: Result<TokenResponse, OAuthClientError>) {
        self.refresh_results.lock().push_back(result);
    }

    /// Number of `exchange_code` calls
    pub fn exchange_calls(&self) -> usize {
        self.exchanges.lock().len()
    }

    /// Number of `refresh_token` calls
    pub fn refresh_calls(&self) -> usize {
        self.refreshes.lock().len()
    }

    /// Every exchange request received
    pub fn exchanges(&self) -> Vec<CodeExchange> {
        self.exchanges.lock().clone()
    }

    /// Every refresh credential received
    pub fn refreshed_with(&self) -> Vec<String> {
        self.refreshes.lock().clone()
    }

    fn next(queue: &Scripted, call: &str) -> Result<TokenResponse, OAuthClientError> {
        queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(OAuthClientError::RequestFailed(format!("no scripted {call}"))))
    }
}

#[async_trait]
impl TokenExchangeClient for MockTokenClient {
    async fn exchange_code(&self, request: &CodeExchange) -> Result<TokenResponse, OAuthClientError> {
        self.exchanges.lock().push(request.clone());
        Self::next(&self.exchange_results, "exchange")
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, OAuthClientError> {
        self.refreshes.lock().push(refresh_token.to_string());
        Self::next(&self.refresh_results, "refresh")
    }
}

/// Scripted [`InteractiveAuthorizer`]
///
/// A blocking authorizer parks every call until [`MockAuthorizer::release`]
/// (or cancellation), which lets tests observe the manager while busy.
/// Unscripted calls fail with an `access_denied` provider error.
#[derive(Debug, Default)]
pub struct MockAuthorizer {
    results: Mutex<VecDeque<Result<Token, AuthFlowError>>>,
    calls: AtomicUsize,
    hold: Option<Arc<Notify>>,
}

impl MockAuthorizer {
    /// Authorizer that answers immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Authorizer that waits for [`Self::release`] before answering
    pub fn blocking() -> Self {
        Self { hold: Some(Arc::new(Notify::new())), ..Self::default() }
    }

    /// Queue the next result
    pub fn push(&self, result: Result<Token, AuthFlowError>) {
        self.results.lock().push_back(result);
    }

    /// Queue a successful result
    pub fn push_token(&self, token: Token) {
        self.push(Ok(token));
    }

    /// Let one parked (or the next) call proceed
    pub fn release(&self) {
        if let Some(hold) = &self.hold {
            hold.notify_one();
        }
    }

    /// Number of `authorize` calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InteractiveAuthorizer for MockAuthorizer {
    async fn authorize(&self, cancel: &CancellationToken) -> Result<Token, AuthFlowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(hold) = &self.hold {
            tokio::select! {
                () = hold.notified() => {}
                () = cancel.cancelled() => return Err(AuthFlowError::Cancelled),
            }
        }

        self.results.lock().pop_front().unwrap_or_else(|| {
            Err(AuthFlowError::Provider { error: "access_denied".to_string(), description: None })
        })
    }
}

type OpenHook = Box<dyn Fn(&str) + Send + Sync>;

/// Recording [`BrowserLauncher`]
///
/// An optional hook runs on every open, e.g. to play the user's part by
/// requesting the redirect URI.
#[derive(Default)]
pub struct MockBrowser {
    opened: Mutex<Vec<String>>,
    fail: AtomicBool,
    on_open: Option<OpenHook>,
}

impl MockBrowser {
    /// Browser that only records URLs
    pub fn new() -> Self {
        Self::default()
    }

    /// Browser that runs `hook` with each opened URL
    pub fn with_hook(hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self { on_open: Some(Box::new(hook)), ..Self::default() }
    }

    /// Browser whose launches fail
    pub fn failing() -> Self {
        let browser = Self::default();
        browser.fail.store(true, Ordering::SeqCst);
        browser
    }

    /// URLs opened so far
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    /// Number of launches attempted
    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }
}

impl BrowserLauncher for MockBrowser {
    fn open_url(&self, url: &str) -> Result<(), BrowserError> {
        self.opened.lock().push(url.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(BrowserError("no browser available".to_string()));
        }
        if let Some(hook) = &self.on_open {
            hook(url);
        }
        Ok(())
    }
}

impl fmt::Debug for MockBrowser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBrowser")
            .field("opened", &self.opened.lock().len())
            .field("fail", &self.fail.load(Ordering::SeqCst))
            .field("has_hook", &self.on_open.is_some())
            .finish()
    }
}
