//! Shared building blocks for loopback OAuth authorization.
//!
//! # Safety and Quality
//!
//! This crate holds everything that does not talk to the network directly:
//! token types, collaborator traits, the callback relay, the token manager,
//! and the platform keychain store.
//!
//! # Feature Flags
//!
//! - `test-utils`: exposes [`testing`] mocks to downstream test suites

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod auth;
pub mod security;
pub mod time;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(any(feature = "test-utils", test))]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use auth::{
    AuthFlowError, InteractiveAuthorizer, SecureStore, SecureStoreExt, Token, TokenEvent,
    TokenExchangeClient, TokenManager, TokenManagerOptions, TokenResponse,
};
pub use security::{KeychainError, KeychainStore};
pub use time::{Clock, SystemClock};
