//! Loopback HTTP listener that captures the OAuth redirect
//!
//! Binds exactly the host and port of the registered redirect URI and serves
//! exactly its path. The first request carrying a callback is parsed into a
//! [`PendingCallbackResult`], serialized as JSON, and pushed through the
//! [`RelayHub`] to whoever waits on the channel. After that the listener
//! answers 404 and shuts itself down once the response has been written.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Router};
use loopauth_common::auth::{ChannelId, RelayHub};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::{Host, Url};

/// Error code relayed when a request carries neither `code` nor `error`
pub const MALFORMED_CALLBACK_ERROR: &str = "malformed_callback";

/// How long `stop()` waits for the server task before aborting it
pub const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization Complete</title></head>
<body><h1>Authorization Successful</h1><p>You can close this window.</p></body>
</html>"#;

const FAILURE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization Failed</title></head>
<body><h1>Authorization Failed</h1><p>The provider did not grant access. You can close this window.</p></body>
</html>"#;

const MALFORMED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization Failed</title></head>
<body><h1>Authorization Failed</h1><p>Invalid or unexpected callback parameters.</p></body>
</html>"#;

const ERROR_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization Error</title></head>
<body><h1>Something went wrong</h1><p>Return to the application and try again.</p></body>
</html>"#;

/// Listener start-up failures
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Redirect URI could not be parsed or has no usable host/path
    #[error("Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    /// Only plain `http` loopback redirects are served
    #[error("Unsupported redirect URI scheme: {0}")]
    UnsupportedScheme(String),

    /// Address could not be bound
    #[error("Failed to bind callback listener on {address}: {source}")]
    Bind {
        /// Requested address
        address: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Redirect parameters handed from the listener to the waiting flow
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCallbackResult {
    /// Authorization code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Echoed `state`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// OAuth error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Human-readable error detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl fmt::Debug for PendingCallbackResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCallbackResult")
            .field("code", &self.code.as_ref().map(|_| "<redacted>"))
            .field("state", &self.state)
            .field("error", &self.error)
            .field("error_description", &self.error_description)
            .finish()
    }
}

#[derive(Clone)]
struct ListenerState {
    relay: RelayHub,
    channel_id: ChannelId,
    fired: Arc<AtomicBool>,
    shutdown: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ListenerState {
    fn trigger_shutdown(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
    }
}

/// Starts redirect listeners
#[derive(Debug, Clone, Copy, Default)]
pub struct CallbackListener;

impl CallbackListener {
    /// Bind the redirect URI and relay its first callback to `channel_id`
    ///
    /// A port of `0` binds an ephemeral port; the handle reports the
    /// effective URI.
    ///
    /// # Errors
    /// Returns `ListenerError` if the URI is not a usable `http` loopback
    /// address or the address cannot be bound
    pub async fn start(
        redirect_uri: &str,
        relay: RelayHub,
        channel_id: ChannelId,
    ) -> Result<ListenerHandle, ListenerError> {
        let target = RedirectTarget::parse(redirect_uri)?;
        let listener = bind(&target).await?;
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            address: target.describe(),
            source,
        })?;

        let effective_uri = target.effective_uri(redirect_uri, local_addr.port());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = ListenerState {
            relay,
            channel_id,
            fired: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Mutex::new(Some(shutdown_tx))),
        };
        let app = router(&target.path, state.clone());

        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                error!(event = "listener.serve_failed", error = %err, "Callback listener error");
            }
        });

        info!(event = "listener.started", address = %local_addr, path = %target.path, "Callback listener started");

        Ok(ListenerHandle {
            redirect_uri: effective_uri,
            local_addr,
            fired: state.fired,
            shutdown: state.shutdown,
            task: Some(task),
        })
    }
}

/// Running listener
///
/// [`ListenerHandle::stop`] shuts down and joins with a bound; dropping the
/// handle signals shutdown and aborts the task as a fallback.
pub struct ListenerHandle {
    redirect_uri: String,
    local_addr: SocketAddr,
    fired: Arc<AtomicBool>,
    shutdown: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Redirect URI actually being served
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Bound socket address
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether a callback has been accepted
    #[must_use]
    pub fn callback_received(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Shut down and wait for the server task, aborting it after
    /// [`SHUTDOWN_JOIN_TIMEOUT`]
    pub async fn stop(mut self) {
        self.signal_shutdown();

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_panic() => {
                    error!(event = "listener.panicked", error = %err, "Callback listener panicked");
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!(
                        event = "listener.join_timeout",
                        timeout_secs = SHUTDOWN_JOIN_TIMEOUT.as_secs(),
                        "Callback listener did not stop in time, aborting"
                    );
                    task.abort();
                }
            }
        }

        info!(event = "listener.stopped", address = %self.local_addr, "Callback listener stopped");
    }

    fn signal_shutdown(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.signal_shutdown();
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                task.abort();
            }
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("redirect_uri", &self.redirect_uri)
            .field("local_addr", &self.local_addr)
            .field("callback_received", &self.callback_received())
            .finish_non_exhaustive()
    }
}

/// Parsed bind target of a redirect URI
struct RedirectTarget {
    url: Url,
    host: BindHost,
    port: u16,
    path: String,
}

enum BindHost {
    Ip(IpAddr),
    Name(String),
}

impl RedirectTarget {
    fn parse(redirect_uri: &str) -> Result<Self, ListenerError> {
        let url = Url::parse(redirect_uri)
            .map_err(|err| ListenerError::InvalidRedirectUri(format!("{redirect_uri}: {err}")))?;

        if url.scheme() != "http" {
            return Err(ListenerError::UnsupportedScheme(url.scheme().to_string()));
        }

        let host = match url.host() {
            Some(Host::Ipv4(ip)) => BindHost::Ip(IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => BindHost::Ip(IpAddr::V6(ip)),
            Some(Host::Domain(name)) => BindHost::Name(name.to_string()),
            None => {
                return Err(ListenerError::InvalidRedirectUri(format!("{redirect_uri}: missing host")))
            }
        };

        let port = url.port_or_known_default().unwrap_or(80);
        let path = url.path().to_string();
        validate_route_path(&path)?;

        Ok(Self { url, host, port, path })
    }

    fn describe(&self) -> String {
        match &self.host {
            BindHost::Ip(ip) => SocketAddr::new(*ip, self.port).to_string(),
            BindHost::Name(name) => format!("{name}:{}", self.port),
        }
    }

    /// The configured string when the port was fixed, otherwise the URI with
    /// the ephemeral port filled in
    fn effective_uri(&self, configured: &str, bound_port: u16) -> String {
        if self.port != 0 {
            return configured.to_string();
        }
        let mut url = self.url.clone();
        // Cannot fail: http URLs always accept a port.
        let _ = url.set_port(Some(bound_port));
        url.to_string()
    }
}

fn validate_route_path(path: &str) -> Result<(), ListenerError> {
    let reserved = path.contains('{')
        || path.contains('}')
        || path.split('/').any(|segment| segment.starts_with(':') || segment.starts_with('*'));
    if reserved {
        return Err(ListenerError::InvalidRedirectUri(format!(
            "redirect path {path} contains route metacharacters"
        )));
    }
    Ok(())
}

async fn bind(target: &RedirectTarget) -> Result<TcpListener, ListenerError> {
    let result = match &target.host {
        BindHost::Ip(ip) => TcpListener::bind(SocketAddr::new(*ip, target.port)).await,
        BindHost::Name(name) => TcpListener::bind((name.as_str(), target.port)).await,
    };
    result.map_err(|source| ListenerError::Bind { address: target.describe(), source })
}

fn router(path: &str, state: ListenerState) -> Router {
    Router::new()
        .route(path, get(handle_query).post(handle_form))
        .fallback(handle_not_found)
        .with_state(state)
}

async fn handle_query(
    State(state): State<ListenerState>,
    params: Result<Query<PendingCallbackResult>, QueryRejection>,
) -> Response {
    let params = params.map(|Query(params)| params).map_err(|rejection| rejection.body_text());
    handle_callback(state, params).await
}

async fn handle_form(
    State(state): State<ListenerState>,
    params: Result<Form<PendingCallbackResult>, FormRejection>,
) -> Response {
    let params = params.map(|Form(params)| params).map_err(|rejection| rejection.body_text());
    handle_callback(state, params).await
}

async fn handle_not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

/// Relay the first request on the callback path
///
/// `Err` carries the extractor's rejection text for a request whose
/// parameters could not be decoded; it is relayed as a malformed callback.
async fn handle_callback(state: ListenerState, params: Result<PendingCallbackResult, String>) -> Response {
    if state.fired.swap(true, Ordering::AcqRel) {
        debug!(event = "listener.duplicate_callback", "Callback already relayed, ignoring");
        return handle_not_found().await;
    }

    let (params, decoded) = match params {
        Ok(params) => (params, true),
        Err(reason) => {
            warn!(event = "listener.callback_unparsable", reason = %reason, "Callback parameters rejected");
            let result = PendingCallbackResult {
                error: Some(MALFORMED_CALLBACK_ERROR.to_string()),
                error_description: Some(format!("callback parameters could not be decoded: {reason}")),
                ..PendingCallbackResult::default()
            };
            (result, false)
        }
    };

    let has_code = params.code.as_deref().is_some_and(|c| !c.is_empty());
    let has_error = params.error.as_deref().is_some_and(|e| !e.is_empty());

    let (status, page, result) = if !decoded {
        (StatusCode::BAD_REQUEST, MALFORMED_PAGE, params)
    } else if has_error {
        (StatusCode::OK, FAILURE_PAGE, params)
    } else if has_code {
        (StatusCode::OK, SUCCESS_PAGE, params)
    } else {
        let result = PendingCallbackResult {
            error: Some(MALFORMED_CALLBACK_ERROR.to_string()),
            error_description: Some("callback carried neither code nor error".to_string()),
            ..params
        };
        (StatusCode::BAD_REQUEST, MALFORMED_PAGE, result)
    };

    let relayed = match serde_json::to_string(&result) {
        Ok(payload) => state.relay.send_payload(&state.channel_id, &payload).await.map_err(|e| e.to_string()),
        Err(err) => Err(err.to_string()),
    };
    state.trigger_shutdown();

    match relayed {
        Ok(()) => {
            info!(
                event = "listener.callback_relayed",
                status = status.as_u16(),
                has_code,
                has_error,
                "Authorization callback relayed"
            );
            (status, Html(page)).into_response()
        }
        Err(err) => {
            error!(event = "listener.relay_failed", error = %err, "Failed to relay authorization callback");
            (StatusCode::INTERNAL_SERVER_ERROR, Html(ERROR_PAGE)).into_response()
        }
    }
}
