//! Configuration loader
//!
//! Loads [`AuthSettings`] from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If incomplete, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! Required:
//! - `LOOPAUTH_CLIENT_ID`
//! - `LOOPAUTH_AUTHORIZATION_ENDPOINT`
//! - `LOOPAUTH_TOKEN_ENDPOINT`
//! - `LOOPAUTH_REDIRECT_URI`
//!
//! Optional:
//! - `LOOPAUTH_SCOPES`: space or comma separated
//! - `LOOPAUTH_AUDIENCE`, `LOOPAUTH_CLIENT_SECRET`
//! - `LOOPAUTH_CALLBACK_TIMEOUT_SECS`, `LOOPAUTH_REFRESH_MARGIN_SECS`
//! - `LOOPAUTH_KEYCHAIN_SERVICE`
//!
//! ## File Locations
//! `loopauth.toml` then `loopauth.json`, in the working directory, its
//! parent, its grandparent, and next to the executable.

use std::path::{Path, PathBuf};

use super::settings::{AuthSettings, ConfigError};

const CONFIG_FILE_NAMES: [&str; 2] = ["loopauth.toml", "loopauth.json"];

/// Load settings with automatic fallback strategy
///
/// # Errors
/// Returns `ConfigError` if neither source yields valid settings; the file
/// error is reported
pub fn load() -> Result<AuthSettings, ConfigError> {
    match load_from_env() {
        Ok(settings) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(settings)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load settings from `LOOPAUTH_*` environment variables
///
/// # Errors
/// Returns `ConfigError::MissingVar` if a required variable is unset,
/// `ConfigError::InvalidValue` if a value does not parse or validate
pub fn load_from_env() -> Result<AuthSettings, ConfigError> {
    let mut settings = AuthSettings::new(
        env_var("LOOPAUTH_CLIENT_ID")?,
        env_var("LOOPAUTH_AUTHORIZATION_ENDPOINT")?,
        env_var("LOOPAUTH_TOKEN_ENDPOINT")?,
        env_var("LOOPAUTH_REDIRECT_URI")?,
    );

    if let Some(scopes) = optional_env("LOOPAUTH_SCOPES") {
        settings.scopes = split_scopes(&scopes);
    }
    settings.audience = optional_env("LOOPAUTH_AUDIENCE");
    settings.client_secret = optional_env("LOOPAUTH_CLIENT_SECRET");
    if let Some(secs) = env_u64("LOOPAUTH_CALLBACK_TIMEOUT_SECS")? {
        settings.callback_timeout_secs = secs;
    }
    if let Some(secs) = env_u64("LOOPAUTH_REFRESH_MARGIN_SECS")? {
        settings.refresh_margin_secs = secs;
    }
    if let Some(service) = optional_env("LOOPAUTH_KEYCHAIN_SERVICE") {
        settings.keychain_service = service;
    }

    settings.validate()?;
    Ok(settings)
}

/// Load settings from a file
///
/// If `path` is `None`, probes the standard locations via
/// [`probe_config_paths`].
///
/// # Errors
/// Returns `ConfigError` if the file is missing, unreadable, malformed, or
/// fails validation
pub fn load_from_file(path: Option<PathBuf>) -> Result<AuthSettings, ConfigError> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::NotFound(p.display().to_string()));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            ConfigError::NotFound("no loopauth.toml or loopauth.json in the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)?;
    let settings = parse_config(&contents, &config_path)?;
    settings.validate()?;
    Ok(settings)
}

/// Parse settings by file extension (`.toml` or `.json`)
fn parse_config(contents: &str, path: &Path) -> Result<AuthSettings, ConfigError> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| ConfigError::Parse { format: "TOML", message: e.to_string() }),
        "json" => serde_json::from_str(contents)
            .map_err(|e| ConfigError::Parse { format: "JSON", message: e.to_string() }),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// First existing config file among the standard locations
#[must_use]
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.clone());
        dirs.push(cwd.join(".."));
        dirs.push(cwd.join("../.."));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

fn env_var(key: &str) -> Result<String, ConfigError> {
    optional_env(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()))
}

/// Set and non-blank
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    optional_env(key)
        .map(|raw| {
            raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw}: {e}"),
            })
        })
        .transpose()
}

fn split_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
