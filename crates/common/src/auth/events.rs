//! Notifications emitted by the token manager

use super::types::Token;

/// Change in the manager's current token
///
/// Delivered over a `tokio::sync::broadcast` channel; slow subscribers may
/// observe `RecvError::Lagged`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    /// The current token was replaced by a different value
    Changed {
        /// Previous token
        old: Option<Token>,
        /// New token
        new: Option<Token>,
    },

    /// The current token went from a value to nothing
    Null,

    /// `release_token()` was called (fires even when nothing was held)
    Released,
}
