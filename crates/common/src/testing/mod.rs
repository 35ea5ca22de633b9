//! Testing utilities and helpers
//!
//! - **[`mocks`]**: in-memory implementations of every collaborator trait
//! - **[`time`]**: a manually advanced [`Clock`](crate::time::Clock)
//!
//! Enabled for this crate's own tests and, through the `test-utils` feature,
//! for downstream test suites.
//!
//! ```rust
//! # #[cfg(feature = "test-utils")]
//! # {
//! use chrono::{Duration, Utc};
//! use loopauth_common::testing::MockClock;
//! use loopauth_common::time::Clock;
//!
//! let start = Utc::now();
//! let clock = MockClock::new(start);
//! clock.advance(Duration::seconds(5));
//! assert_eq!(clock.now() - start, Duration::seconds(5));
//! # }
//! ```

pub mod mocks;
pub mod time;

pub use mocks::{
    token_response, MockAuthorizer, MockBrowser, MockSecureStore, MockTokenClient, StoreOp,
};
pub use time::MockClock;
