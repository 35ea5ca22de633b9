//! Token manager with cache reuse and proactive refresh
//!
//! Owns the single current [`Token`] for the application:
//! - Reuses a cached token from the secure store when it is still valid
//! - Refreshes an expired cached token before falling back to the browser
//! - Runs the interactive flow as the last resort
//! - Re-arms one refresh timer every time a refreshable token is adopted
//!
//! At most one acquisition or refresh runs at a time. Callers never block:
//! [`TokenManager::begin_get_token`] spawns the work and reports through an
//! optional callback and the [`TokenEvent`] broadcast.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{OAuthClientError, StoreError};
use super::events::TokenEvent;
use super::gate::RefreshGate;
use super::traits::{InteractiveAuthorizer, SecureStore, SecureStoreExt, TokenExchangeClient};
use super::types::{CachedTokenRecord, Token};
use crate::time::{Clock, SystemClock};

/// Store record name used when none is configured
pub const DEFAULT_RECORD_NAME: &str = "oauth.token";

/// Refresh this long before expiry unless configured otherwise
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(120);

/// Retry delay for a refresh timer that fired while an acquisition was running
pub const BUSY_RETRY_DELAY: Duration = Duration::from_secs(5);

const EVENT_CAPACITY: usize = 32;

/// Invoked once with the acquisition result
pub type TokenCallback = Box<dyn FnOnce(Option<Token>) + Send + 'static>;

/// Token manager tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenManagerOptions {
    /// Secure store record holding the cached token
    pub record_name: String,

    /// How long before expiry the refresh timer fires
    pub safety_margin: Duration,
}

impl Default for TokenManagerOptions {
    fn default() -> Self {
        Self { record_name: DEFAULT_RECORD_NAME.to_string(), safety_margin: DEFAULT_SAFETY_MARGIN }
    }
}

/// Delay before the refresh timer should fire for `token`
///
/// `max(0, created_at + expires_in - now - margin)`, where the margin never
/// exceeds half the token's lifetime. A token that lives shorter than the
/// margin is therefore refreshed at its half-life, not immediately.
#[must_use]
pub fn refresh_delay(token: &Token, now: DateTime<Utc>, margin: Duration) -> Duration {
    let half_life_ms = token.expires_in.saturating_mul(1000).max(0) / 2;
    let margin_ms = i64::try_from(margin.as_millis()).unwrap_or(i64::MAX).min(half_life_ms);
    let remaining_ms = (token.expires_at() - now).num_milliseconds().saturating_sub(margin_ms);
    Duration::from_millis(u64::try_from(remaining_ms).unwrap_or(0))
}

#[derive(Debug, Error)]
enum RefreshError {
    #[error(transparent)]
    Client(#[from] OAuthClientError),

    #[error("refreshed token is already expired")]
    AlreadyExpired,
}

enum Acquisition {
    Acquired(Token),
    Failed,
    Cancelled,
}

/// Long-lived owner of the current token
///
/// Cheap to clone; clones share state. Dropping the last clone aborts the
/// refresh timer.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct RefreshTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    store: Arc<dyn SecureStore>,
    client: Arc<dyn TokenExchangeClient>,
    authorizer: Arc<dyn InteractiveAuthorizer>,
    clock: Arc<dyn Clock>,
    options: TokenManagerOptions,
    token: RwLock<Option<Token>>,
    in_progress: AtomicBool,
    gate: RefreshGate,
    events: broadcast::Sender<TokenEvent>,
    refresh_timer: Mutex<Option<RefreshTimer>>,
    timer_generation: AtomicU64,
}

/// Clears the in-progress flag when dropped, including on panic or when the
/// owning task is dropped before it runs
struct InProgressGuard {
    inner: Arc<Inner>,
}

impl InProgressGuard {
    fn try_acquire(inner: &Arc<Inner>) -> Option<Self> {
        inner
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { inner: Arc::clone(inner) })
    }
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.inner.in_progress.store(false, Ordering::Release);
    }
}

impl TokenManager {
    /// Create a manager using the system clock
    #[must_use]
    pub fn new(
        store: Arc<dyn SecureStore>,
        client: Arc<dyn TokenExchangeClient>,
        authorizer: Arc<dyn InteractiveAuthorizer>,
        options: TokenManagerOptions,
    ) -> Self {
        Self::with_clock(store, client, authorizer, options, Arc::new(SystemClock))
    }

    /// Create a manager with an injected clock
    #[must_use]
    pub fn with_clock(
        store: Arc<dyn SecureStore>,
        client: Arc<dyn TokenExchangeClient>,
        authorizer: Arc<dyn InteractiveAuthorizer>,
        options: TokenManagerOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                authorizer,
                clock,
                options,
                token: RwLock::new(None),
                in_progress: AtomicBool::new(false),
                gate: RefreshGate::new(),
                events,
                refresh_timer: Mutex::new(None),
                timer_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Start acquiring a token in the background
    ///
    /// Returns `false` without doing anything if an acquisition or refresh is
    /// already running, or if no Tokio runtime is available. Otherwise the
    /// work is spawned and `true` is returned immediately.
    ///
    /// The callback runs after the result was assigned and after the manager
    /// stopped being busy, so it may start another acquisition. It is not
    /// invoked when the attempt was cancelled.
    pub fn begin_get_token(&self, cancel: CancellationToken, callback: Option<TokenCallback>) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(event = "token.acquire.no_runtime", "begin_get_token called outside a Tokio runtime");
            return false;
        };

        let Some(busy) = InProgressGuard::try_acquire(&self.inner) else {
            debug!(event = "token.acquire.busy", "Token acquisition already in progress");
            return false;
        };

        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            let result = match inner.acquire(&cancel).await {
                Acquisition::Cancelled => {
                    info!(event = "token.acquire.cancelled", "Token acquisition cancelled");
                    return;
                }
                Acquisition::Acquired(token) => Some(token),
                Acquisition::Failed => None,
            };

            inner.commit(result.clone(), None);
            drop(busy);

            if let Some(callback) = callback {
                callback(result);
            }
        });

        true
    }

    /// Current token snapshot
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        self.inner.token.read().clone()
    }

    /// Current token, after any running background refresh has finished
    pub async fn settled_token(&self) -> Option<Token> {
        self.inner.gate.wait_open().await;
        self.token()
    }

    /// Whether an acquisition or refresh is running
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.in_progress.load(Ordering::Acquire)
    }

    /// Drop the current token and stop the refresh timer
    ///
    /// Emits `Changed`/`Null` if a token was held, then always `Released`.
    /// The cached record is left alone; see [`Self::clear_cached_token`].
    pub fn release_token(&self) {
        self.inner.disarm_refresh();
        self.inner.commit(None, None);
        let _ = self.inner.events.send(TokenEvent::Released);
        info!(event = "token.released", "Token released");
    }

    /// Delete the cached record (sign-out)
    ///
    /// # Errors
    /// Returns error if the store rejects the delete
    pub async fn clear_cached_token(&self) -> Result<(), StoreError> {
        self.inner.store.delete(&self.inner.options.record_name).await?;
        info!(event = "token.cache.cleared", "Cached token deleted");
        Ok(())
    }

    /// Subscribe to token notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TokenEvent> {
        self.inner.events.subscribe()
    }

    /// Configured refresh safety margin
    #[must_use]
    pub fn safety_margin(&self) -> Duration {
        self.inner.options.safety_margin
    }

    /// Configured store record name
    #[must_use]
    pub fn record_name(&self) -> &str {
        &self.inner.options.record_name
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("options", &self.inner.options)
            .field("token", &*self.inner.token.read())
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn acquire(&self, cancel: &CancellationToken) -> Acquisition {
        if cancel.is_cancelled() {
            return Acquisition::Cancelled;
        }

        if let Some(outcome) = self.try_cached(cancel).await {
            return outcome;
        }

        if cancel.is_cancelled() {
            return Acquisition::Cancelled;
        }

        info!(event = "token.acquire.interactive", "Starting interactive authorization");
        match self.authorizer.authorize(cancel).await {
            Ok(token) => {
                self.persist(&token).await;
                if cancel.is_cancelled() {
                    return Acquisition::Cancelled;
                }
                info!(event = "token.acquired", source = "interactive", "Token acquired");
                Acquisition::Acquired(token)
            }
            Err(err) if err.is_cancelled() => Acquisition::Cancelled,
            Err(err) => {
                warn!(event = "token.acquire.failed", error = %err, "Interactive authorization failed");
                Acquisition::Failed
            }
        }
    }

    /// `None` means fall through to the interactive flow
    async fn try_cached(&self, cancel: &CancellationToken) -> Option<Acquisition> {
        let name = &self.options.record_name;
        if !self.store.exists(name).await {
            debug!(event = "token.cache.miss", "No cached token");
            return None;
        }

        let record = match self.store.load::<CachedTokenRecord>(name).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(err) => {
                warn!(event = "token.cache.corrupt", error = %err, "Cached token unreadable, deleting");
                self.discard_cached().await;
                return None;
            }
        };

        if cancel.is_cancelled() {
            return Some(Acquisition::Cancelled);
        }

        let cached = Token::from(record);
        if !cached.has_plausible_lifetime() {
            warn!(
                event = "token.cache.corrupt",
                expires_in = cached.expires_in,
                "Cached token lifetime out of range, deleting"
            );
            self.discard_cached().await;
            return None;
        }

        if !cached.is_expired_at(self.clock.now()) {
            info!(event = "token.acquired", source = "cache", "Reusing cached token");
            return Some(Acquisition::Acquired(cached));
        }

        if !cached.can_refresh() {
            info!(event = "token.cache.expired", "Cached token expired without refresh credential");
            self.discard_cached().await;
            return None;
        }

        match self.refresh_from(&cached).await {
            Ok(token) => {
                self.persist(&token).await;
                if cancel.is_cancelled() {
                    return Some(Acquisition::Cancelled);
                }
                info!(event = "token.acquired", source = "refresh", "Refreshed cached token");
                Some(Acquisition::Acquired(token))
            }
            Err(err) => {
                warn!(event = "token.refresh.failed", error = %err, "Cached token refresh failed, deleting");
                self.discard_cached().await;
                if cancel.is_cancelled() {
                    return Some(Acquisition::Cancelled);
                }
                None
            }
        }
    }

    async fn refresh_from(&self, previous: &Token) -> Result<Token, RefreshError> {
        let refresh_token = previous
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(OAuthClientError::NoRefreshToken)?;

        let response = self.client.refresh_token(refresh_token).await?;
        let now = self.clock.now();
        let token = Token::from_refresh(response, previous, now);
        if token.is_expired_at(now) {
            return Err(RefreshError::AlreadyExpired);
        }
        Ok(token)
    }

    async fn persist(&self, token: &Token) {
        let record = CachedTokenRecord::from(token);
        if let Err(err) = self.store.save(&record, &self.options.record_name).await {
            warn!(event = "token.cache.save_failed", error = %err, "Failed to cache token");
        }
    }

    async fn discard_cached(&self) {
        if let Err(err) = self.store.delete(&self.options.record_name).await {
            warn!(event = "token.cache.delete_failed", error = %err, "Failed to delete cached token");
        }
    }

    /// Assign `next` as the current token, notify, and re-arm the timer
    ///
    /// With `expected`, the assignment only happens if the current token is
    /// still that value. Results older than the current token are discarded.
    fn commit(self: &Arc<Self>, next: Option<Token>, expected: Option<&Token>) -> bool {
        let mut current = self.token.write();

        if let Some(expected) = expected {
            if current.as_ref() != Some(expected) {
                debug!(event = "token.commit.superseded", "Current token changed meanwhile, discarding");
                return false;
            }
        }

        if let (Some(held), Some(candidate)) = (current.as_ref(), next.as_ref()) {
            if candidate.created_at < held.created_at {
                debug!(event = "token.commit.stale", "Discarding token older than the current one");
                return false;
            }
        }

        let old = std::mem::replace(&mut *current, next.clone());
        if old != next {
            let went_null = old.is_some() && next.is_none();
            let _ = self.events.send(TokenEvent::Changed { old, new: next.clone() });
            if went_null {
                let _ = self.events.send(TokenEvent::Null);
            }
        }

        match next.as_ref() {
            Some(token) if token.can_refresh() => self.arm_refresh(token),
            _ => self.disarm_refresh(),
        }
        true
    }

    fn arm_refresh(self: &Arc<Self>, token: &Token) {
        let delay = refresh_delay(token, self.clock.now(), self.options.safety_margin);
        let mut slot = self.refresh_timer.lock();
        self.schedule_refresh(&mut slot, delay);
        debug!(event = "token.refresh.armed", delay_secs = delay.as_secs(), "Refresh timer armed");
    }

    /// Spawn the timer task into `slot`, replacing any previous timer
    ///
    /// The caller holds the slot lock so a zero-delay timer cannot look
    /// itself up before it is registered.
    fn schedule_refresh(self: &Arc<Self>, slot: &mut Option<RefreshTimer>, delay: Duration) {
        let generation = self.timer_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.refresh_now(generation).await;
            }
        });

        if let Some(previous) = slot.replace(RefreshTimer { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Try again later unless a commit re-armed or disarmed the timer
    ///
    /// An acquisition that ends in cancellation never commits, so without
    /// this the refreshable token would be left without a timer.
    fn retry_refresh_later(self: &Arc<Self>) {
        let refreshable = self.token.read().as_ref().is_some_and(Token::can_refresh);
        let mut slot = self.refresh_timer.lock();
        if !refreshable || slot.is_some() {
            return;
        }
        self.schedule_refresh(&mut slot, BUSY_RETRY_DELAY);
        debug!(
            event = "token.refresh.deferred",
            delay_secs = BUSY_RETRY_DELAY.as_secs(),
            "Acquisition in progress, refresh deferred"
        );
    }

    fn disarm_refresh(&self) {
        if let Some(timer) = self.refresh_timer.lock().take() {
            timer.handle.abort();
            debug!(event = "token.refresh.disarmed", "Refresh timer disarmed");
        }
    }

    async fn refresh_now(self: &Arc<Self>, generation: u64) {
        {
            let mut slot = self.refresh_timer.lock();
            if !slot.as_ref().is_some_and(|timer| timer.generation == generation) {
                return;
            }
            // Detach our own handle; re-arming below must not abort us.
            drop(slot.take());
        }

        let Some(_busy) = InProgressGuard::try_acquire(self) else {
            self.retry_refresh_later();
            return;
        };

        let Some(previous) = self.token.read().clone().filter(Token::can_refresh) else {
            return;
        };

        let _gate = self.gate.close();
        let next = match self.refresh_from(&previous).await {
            Ok(token) => {
                self.persist(&token).await;
                info!(
                    event = "token.refresh.succeeded",
                    expires_in = token.expires_in,
                    "Token refreshed ahead of expiry"
                );
                Some(token)
            }
            Err(err) => {
                warn!(event = "token.refresh.failed", error = %err, "Scheduled refresh failed");
                None
            }
        };

        self.commit(next, Some(&previous));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = self.refresh_timer.get_mut().take() {
            timer.handle.abort();
        }
    }
}
