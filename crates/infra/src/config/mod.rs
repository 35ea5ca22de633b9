//! Configuration loading and management
//!
//! Settings come from `LOOPAUTH_*` environment variables or a
//! `loopauth.toml`/`loopauth.json` file.

pub mod loader;
pub mod settings;

// Re-export commonly used items
pub use loader::{load, load_from_env, load_from_file, probe_config_paths};
pub use settings::{AuthSettings, ConfigError, DEFAULT_KEYCHAIN_SERVICE, DEFAULT_TOKEN_RECORD};
