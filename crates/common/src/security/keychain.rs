//! Keychain-backed secure store
//!
//! ## Usage
//!
//! ```no_run
//! use loopauth_common::security::KeychainStore;
//!
//! let store = KeychainStore::new("LoopAuth.desktop");
//! store.set_secret("oauth.token", "{...}")?;
//! assert_eq!(store.get_secret("oauth.token")?, "{...}");
//! # Ok::<(), loopauth_common::security::KeychainError>(())
//! ```

use async_trait::async_trait;
use keyring::Entry;
use thiserror::Error;
use tracing::debug;

use crate::auth::{SecureStore, StoreError};

/// Secure store over the platform keychain
///
/// Every record name becomes one keychain entry under the configured service.
#[derive(Debug, Clone)]
pub struct KeychainStore {
    service_name: String,
}

impl KeychainStore {
    /// Create a store for `service_name` (e.g. "LoopAuth.desktop")
    pub fn new(service_name: impl Into<String>) -> Self {
        Self { service_name: service_name.into() }
    }

    /// Service the entries are filed under
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Store a secret, replacing any previous value
    ///
    /// # Errors
    /// Returns `KeychainError::AccessFailed` if keychain access fails
    pub fn set_secret(&self, key: &str, value: &str) -> Result<(), KeychainError> {
        debug!(service = %self.service_name, key = %key, "Storing secret in keychain");

        self.entry(key)?.set_password(value).map_err(|e| {
            KeychainError::AccessFailed(format!("Failed to store secret for {key}: {e}"))
        })
    }

    /// Retrieve a secret
    ///
    /// # Errors
    /// Returns `KeychainError::NotFound` if the secret doesn't exist,
    /// `KeychainError::AccessFailed` if keychain access fails
    pub fn get_secret(&self, key: &str) -> Result<String, KeychainError> {
        debug!(service = %self.service_name, key = %key, "Retrieving secret from keychain");

        self.entry(key)?.get_password().map_err(|e| match e {
            keyring::Error::NoEntry => KeychainError::NotFound,
            other => KeychainError::AccessFailed(format!("Failed to retrieve secret for {key}: {other}")),
        })
    }

    /// Delete a secret (idempotent)
    ///
    /// # Errors
    /// Returns `KeychainError::AccessFailed` if keychain access fails
    pub fn delete_secret(&self, key: &str) -> Result<(), KeychainError> {
        debug!(service = %self.service_name, key = %key, "Deleting secret from keychain");

        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => {
                Err(KeychainError::AccessFailed(format!("Failed to delete secret for {key}: {e}")))
            }
        }
    }

    /// Check if a secret exists
    #[must_use]
    pub fn secret_exists(&self, key: &str) -> bool {
        self.entry(key).is_ok_and(|entry| entry.get_password().is_ok())
    }

    fn entry(&self, key: &str) -> Result<Entry, KeychainError> {
        Entry::new(&self.service_name, key)
            .map_err(|e| KeychainError::AccessFailed(format!("Failed to open keychain entry: {e}")))
    }
}

#[async_trait]
impl SecureStore for KeychainStore {
    async fn exists(&self, name: &str) -> bool {
        self.secret_exists(name)
    }

    async fn load_raw(&self, name: &str) -> Result<Option<String>, StoreError> {
        match self.get_secret(name) {
            Ok(value) => Ok(Some(value)),
            Err(KeychainError::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_raw(&self, name: &str, value: &str) -> Result<(), StoreError> {
        Ok(self.set_secret(name, value)?)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        Ok(self.delete_secret(name)?)
    }
}

/// Keychain errors
#[derive(Debug, Error)]
pub enum KeychainError {
    /// No entry under this key
    #[error("Secret not found in keychain")]
    NotFound,

    /// Keychain could not be opened or refused the operation
    #[error("Keychain access failed: {0}")]
    AccessFailed(String),
}

impl From<KeychainError> for StoreError {
    fn from(err: KeychainError) -> Self {
        StoreError::AccessFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for security::keychain.
    use super::*;

    /// Validates keychain errors map onto store errors.
    ///
    /// Assertions:
    /// - Ensures the converted error is `StoreError::AccessFailed`.
    /// - Ensures the original message is kept.
    #[test]
    fn test_keychain_error_converts_to_store_error() {
        let err: StoreError = KeychainError::AccessFailed("locked".to_string()).into();

        assert!(matches!(&err, StoreError::AccessFailed(msg) if msg.contains("locked")));
    }

    /// Validates the service name is kept.
    ///
    /// Assertions:
    /// - Confirms `service_name()` echoes the constructor argument.
    #[test]
    fn test_service_name() {
        assert_eq!(KeychainStore::new("LoopAuth.test").service_name(), "LoopAuth.test");
    }

    /// Validates the platform keychain round trip.
    ///
    /// Requires an unlocked OS keychain, so it is ignored by default.
    ///
    /// Assertions:
    /// - Confirms a saved value loads back.
    /// - Ensures delete is idempotent and removes the value.
    #[tokio::test]
    #[ignore = "requires a platform keychain"]
    async fn test_platform_roundtrip() {
        let store = KeychainStore::new(format!("LoopAuthTest.{}", uuid::Uuid::new_v4()));

        store.save_raw("record", "value").await.unwrap();
        assert_eq!(store.load_raw("record").await.unwrap().as_deref(), Some("value"));

        store.delete("record").await.unwrap();
        store.delete("record").await.unwrap();
        assert!(store.load_raw("record").await.unwrap().is_none());
        assert!(!store.exists("record").await);
    }
}
