//! Collaborator traits
//!
//! These traits are the seams between the token manager and the outside
//! world (secure storage, the token endpoint, the browser, the interactive
//! flow). Production implementations live in this crate and in
//! `loopauth-infra`; mocks live in `testing`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::error::{AuthFlowError, BrowserError, OAuthClientError, StoreError};
use super::types::{CodeExchange, Token, TokenResponse};

/// Encrypted-at-rest key/value storage for small blobs
///
/// Last write wins; the store makes no concurrency promises beyond that.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Check whether a value exists under `name`
    async fn exists(&self, name: &str) -> bool;

    /// Read the raw value, `None` when absent
    ///
    /// # Errors
    /// Returns error if the backend cannot be read
    async fn load_raw(&self, name: &str) -> Result<Option<String>, StoreError>;

    /// Write the raw value, replacing any previous one
    ///
    /// # Errors
    /// Returns error if the backend rejects the write
    async fn save_raw(&self, name: &str, value: &str) -> Result<(), StoreError>;

    /// Remove the value (idempotent)
    ///
    /// # Errors
    /// Returns error if the backend rejects the delete
    async fn delete(&self, name: &str) -> Result<(), StoreError>;
}

/// Typed JSON helpers over any [`SecureStore`]
#[async_trait]
pub trait SecureStoreExt: SecureStore {
    /// Load and decode a value
    ///
    /// # Errors
    /// Returns error if the read fails or the stored value does not decode
    async fn load<T>(&self, name: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send,
    {
        match self.load_raw(name).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Encode and save a value
    ///
    /// # Errors
    /// Returns error if encoding or the write fails
    async fn save<T>(&self, value: &T, name: &str) -> Result<(), StoreError>
    where
        T: Serialize + Sync,
    {
        let raw = serde_json::to_string(value)?;
        self.save_raw(name, &raw).await
    }
}

impl<S: SecureStore + ?Sized> SecureStoreExt for S {}

/// Remote token endpoint
#[async_trait]
pub trait TokenExchangeClient: Send + Sync {
    /// Redeem an authorization code
    ///
    /// # Errors
    /// Returns error if the request fails or the server rejects the code
    async fn exchange_code(&self, request: &CodeExchange)
        -> Result<TokenResponse, OAuthClientError>;

    /// Obtain a new access token from a refresh credential
    ///
    /// # Errors
    /// Returns error if the request fails or the refresh token is
    /// invalid/revoked
    async fn refresh_token(&self, refresh_token: &str)
        -> Result<TokenResponse, OAuthClientError>;
}

/// Opens a URL in the user's browser
pub trait BrowserLauncher: Send + Sync {
    /// Open `url`; returns once the launch was handed to the OS
    ///
    /// # Errors
    /// Returns error if no browser could be launched
    fn open_url(&self, url: &str) -> Result<(), BrowserError>;
}

/// Runs one interactive authorization and yields a token
///
/// The token manager only depends on this seam; the loopback implementation
/// is `loopauth_infra::oauth::AuthFlowCoordinator`.
#[async_trait]
pub trait InteractiveAuthorizer: Send + Sync {
    /// Drive one attempt to completion
    ///
    /// # Errors
    /// Returns error if the attempt is rejected, cancelled, times out, or
    /// the exchange fails
    async fn authorize(&self, cancel: &CancellationToken) -> Result<Token, AuthFlowError>;
}
