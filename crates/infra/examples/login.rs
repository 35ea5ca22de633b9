//! Sign in with the system browser and print token lifetimes
//!
//! ```text
//! LOOPAUTH_CLIENT_ID=... \
//! LOOPAUTH_AUTHORIZATION_ENDPOINT=https://example.auth0.com/authorize \
//! LOOPAUTH_TOKEN_ENDPOINT=https://example.auth0.com/oauth/token \
//! LOOPAUTH_REDIRECT_URI=http://127.0.0.1:8765/callback \
//! cargo run -p loopauth-infra --example login
//! ```
//!
//! Pass `--logout` to delete the cached token first.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use loopauth_common::auth::{TokenEvent, TokenManager};
use loopauth_common::KeychainStore;
use loopauth_infra::{config, init_tracing, AuthFlowCoordinator, LogFormat, OAuthClient, SystemBrowser};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(LogFormat::Pretty);

    let settings = config::load().context("failed to load LoopAuth settings")?;
    info!(client_id = %settings.client_id, redirect_uri = %settings.redirect_uri, "Settings loaded");

    let oauth_config = settings.to_oauth_config();
    let client = Arc::new(OAuthClient::new(oauth_config.clone())?);
    let coordinator = AuthFlowCoordinator::new(oauth_config, client.clone(), Arc::new(SystemBrowser))
        .with_callback_timeout(settings.callback_timeout());
    let store = Arc::new(KeychainStore::new(settings.keychain_service.clone()));

    let manager =
        TokenManager::new(store, client, Arc::new(coordinator), settings.token_manager_options());

    if std::env::args().any(|arg| arg == "--logout") {
        manager.clear_cached_token().await?;
        info!("Cached token removed");
    }

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                TokenEvent::Changed { new: Some(token), .. } => {
                    info!(expires_at = %token.expires_at(), "Token changed");
                }
                TokenEvent::Changed { new: None, .. } | TokenEvent::Null => info!("Token cleared"),
                TokenEvent::Released => info!("Token released"),
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let (tx, rx) = oneshot::channel();
    let started = manager.begin_get_token(
        cancel,
        Some(Box::new(move |token| {
            let _ = tx.send(token);
        })),
    );
    if !started {
        bail!("token acquisition already in progress");
    }

    let Some(token) = rx.await.context("token manager dropped the callback")? else {
        bail!("no token obtained");
    };

    info!(
        token_type = %token.token_type,
        expires_in = token.expires_in,
        refreshable = token.can_refresh(),
        "Signed in"
    );
    Ok(())
}
