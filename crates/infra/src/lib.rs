//! # LoopAuth Infrastructure
//!
//! Concrete implementations of the seams defined in `loopauth-common`.
//!
//! This crate contains:
//! - The loopback redirect listener (axum)
//! - The token endpoint client (reqwest)
//! - The interactive flow coordinator
//! - System browser launching
//! - Settings loading and tracing setup
//!
//! ## Architecture
//! - Implements traits defined in `loopauth-common::auth`
//! - Contains all "impure" code (sockets, HTTP, processes)

pub mod config;
pub mod oauth;
pub mod observability;
pub mod platform;

// Re-export commonly used items
pub use config::{AuthSettings, ConfigError};
pub use oauth::{
    AuthFlowCoordinator, CallbackListener, FlowState, ListenerError, ListenerHandle, OAuthClient,
    PendingCallbackResult,
};
pub use observability::{init_tracing, LogFormat};
pub use platform::SystemBrowser;
