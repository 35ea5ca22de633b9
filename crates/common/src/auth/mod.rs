//! Loopback OAuth 2.0 + PKCE token acquisition
//!
//! Everything here is transport-agnostic; the HTTP pieces (redirect
//! listener, token endpoint client, browser launcher) live in
//! `loopauth-infra` and plug in through [`traits`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   TokenManager   │  cache reuse → refresh → interactive, timer refresh
//! └────────┬─────────┘
//!          ├──► SecureStore            (cached token record)
//!          ├──► TokenExchangeClient    (refresh)
//!          └──► InteractiveAuthorizer  (browser + redirect listener)
//!                      │
//!                      └──► RelayHub   (listener → flow handoff)
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use loopauth_common::auth::{
//!     InteractiveAuthorizer, TokenExchangeClient, TokenManager, TokenManagerOptions,
//! };
//! use loopauth_common::security::KeychainStore;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(
//! #     client: Arc<dyn TokenExchangeClient>,
//! #     authorizer: Arc<dyn InteractiveAuthorizer>,
//! # ) {
//! let store = Arc::new(KeychainStore::new("LoopAuth.desktop"));
//! let manager = TokenManager::new(store, client, authorizer, TokenManagerOptions::default());
//!
//! let mut events = manager.subscribe();
//! manager.begin_get_token(CancellationToken::new(), None);
//! let event = events.recv().await;
//! # }
//! ```

pub mod error;
pub mod events;
pub mod gate;
pub mod pkce;
pub mod relay;
pub mod token_manager;
pub mod traits;
pub mod types;

pub use error::{AuthFlowError, BrowserError, OAuthClientError, RelayError, StoreError};
pub use events::TokenEvent;
pub use gate::RefreshGate;
pub use pkce::{generate_state, validate_state, PkceChallenge};
pub use relay::{ChannelId, RelayHub, RelayReceiver, MAX_PAYLOAD_BYTES};
pub use token_manager::{refresh_delay, TokenCallback, TokenManager, TokenManagerOptions};
pub use traits::{
    BrowserLauncher, InteractiveAuthorizer, SecureStore, SecureStoreExt, TokenExchangeClient,
};
pub use types::{
    CachedTokenRecord, CodeExchange, OAuthConfig, OAuthError, Token, TokenResponse,
    MAX_TOKEN_LIFETIME_SECS,
};
