//! Loopback OAuth flow
//!
//! - [`callback`]: redirect listener bound to the registered loopback URI
//! - [`client`]: token endpoint client
//! - [`flow`]: coordinator driving one interactive authorization at a time

pub mod callback;
pub mod client;
pub mod flow;

pub use callback::{
    CallbackListener, ListenerError, ListenerHandle, PendingCallbackResult, MALFORMED_CALLBACK_ERROR,
};
pub use client::OAuthClient;
pub use flow::{build_authorization_url, AuthFlowCoordinator, FlowState, DEFAULT_CALLBACK_TIMEOUT};
