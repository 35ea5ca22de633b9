//! Platform secure storage
//!
//! [`KeychainStore`] persists small secrets in the operating system keychain
//! (macOS Keychain Access, Windows Credential Manager, Linux Secret Service)
//! and implements the [`SecureStore`](crate::auth::SecureStore) seam.

pub mod keychain;

pub use keychain::{KeychainError, KeychainStore};
