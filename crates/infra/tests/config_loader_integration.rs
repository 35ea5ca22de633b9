//! Integration tests for loading settings from files.

use std::path::PathBuf;
use std::time::Duration;

use loopauth_infra::config::{load_from_file, ConfigError, DEFAULT_KEYCHAIN_SERVICE};
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("write config");
    path
}

/// Validates a full TOML file.
///
/// Assertions:
/// - Confirms every field is read, including extra params.
/// - Confirms derived runtime values.
#[test]
fn test_load_toml_file() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "loopauth.toml",
        r#"
client_id = "desktop-app"
authorization_endpoint = "https://auth.example.com/authorize"
token_endpoint = "https://auth.example.com/oauth/token"
redirect_uri = "http://127.0.0.1:8765/callback"
scopes = ["openid", "offline_access"]
audience = "https://api.example.com"
callback_timeout_secs = 120
refresh_margin_secs = 60

[extra_authorize_params]
prompt = "consent"
"#,
    );

    let settings = load_from_file(Some(path)).expect("settings load");

    assert_eq!(settings.client_id, "desktop-app");
    assert_eq!(settings.scopes, vec!["openid", "offline_access"]);
    assert_eq!(settings.callback_timeout(), Duration::from_secs(120));
    assert_eq!(settings.token_manager_options().safety_margin, Duration::from_secs(60));
    assert_eq!(settings.keychain_service, DEFAULT_KEYCHAIN_SERVICE);

    let oauth = settings.to_oauth_config();
    assert_eq!(oauth.audience.as_deref(), Some("https://api.example.com"));
    assert_eq!(oauth.extra_authorize_params, vec![("prompt".to_string(), "consent".to_string())]);
}

/// Validates a minimal JSON file.
///
/// Assertions:
/// - Confirms defaults fill the optional fields.
#[test]
fn test_load_json_file() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "loopauth.json",
        r#"{
            "client_id": "desktop-app",
            "authorization_endpoint": "https://auth.example.com/authorize",
            "token_endpoint": "https://auth.example.com/oauth/token",
            "redirect_uri": "http://localhost:8765/callback"
        }"#,
    );

    let settings = load_from_file(Some(path)).expect("settings load");

    assert_eq!(settings.callback_timeout_secs, 300);
    assert_eq!(settings.refresh_margin_secs, 120);
    assert_eq!(settings.token_record_name, "oauth.token");
    assert!(settings.client_secret.is_none());
}

/// Validates file error reporting.
///
/// Assertions:
/// - Ensures a missing path is `NotFound`.
/// - Ensures broken JSON is a `Parse` error.
/// - Ensures a file that parses but fails validation is `InvalidValue`.
#[test]
fn test_file_errors() {
    let dir = TempDir::new().unwrap();

    let missing = load_from_file(Some(dir.path().join("absent.toml")));
    assert!(matches!(missing, Err(ConfigError::NotFound(_))));

    let broken = write(&dir, "broken.json", r#"{ "client_id": "x" "#);
    assert!(matches!(load_from_file(Some(broken)), Err(ConfigError::Parse { format: "JSON", .. })));

    let https = write(
        &dir,
        "https.toml",
        r#"
client_id = "desktop-app"
authorization_endpoint = "https://auth.example.com/authorize"
token_endpoint = "https://auth.example.com/oauth/token"
redirect_uri = "https://127.0.0.1:8765/callback"
"#,
    );
    assert!(matches!(
        load_from_file(Some(https)),
        Err(ConfigError::InvalidValue { key, .. }) if key == "redirect_uri"
    ));
}
