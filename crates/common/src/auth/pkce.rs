//! PKCE (Proof Key for Code Exchange) and state helpers
//!
//! Implements RFC 7636 (S256) for desktop clients that cannot keep a client
//! secret, plus the random `state` value that ties a redirect back to the
//! authorization request that produced it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of random bytes behind verifiers and state values (43 base64url
/// chars).
const RANDOM_BYTES: usize = 32;

fn random_urlsafe() -> String {
    let mut bytes = [0u8; RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a cryptographically secure code verifier
///
/// 32 random bytes, base64url without padding: 43 characters, inside the
/// 43-128 range RFC 7636 requires.
#[must_use]
pub fn generate_code_verifier() -> String {
    random_urlsafe()
}

/// Derive the S256 code challenge: `BASE64URL(SHA256(ASCII(verifier)))`
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate a random `state` value for an authorization request
#[must_use]
pub fn generate_state() -> String {
    random_urlsafe()
}

/// Compare the sent and received `state` values in constant time
///
/// Length differences short-circuit; the lengths of our own state values are
/// not secret.
#[must_use]
pub fn validate_state(expected: &str, actual: &str) -> bool {
    let (expected, actual) = (expected.as_bytes(), actual.as_bytes());
    if expected.len() != actual.len() {
        return false;
    }

    expected.iter().zip(actual).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

/// Verifier/challenge pair for one authorization attempt
///
/// The challenge travels in the browser URL; the verifier stays in memory
/// until the code exchange.
#[derive(Clone)]
pub struct PkceChallenge {
    /// Secret sent only with the token exchange
    pub code_verifier: String,

    /// SHA256 of the verifier, sent with the authorization request
    pub code_challenge: String,
}

impl PkceChallenge {
    /// Generate a fresh pair
    ///
    /// # Examples
    /// ```
    /// use loopauth_common::auth::pkce::{generate_code_challenge, PkceChallenge};
    ///
    /// let pkce = PkceChallenge::generate();
    /// assert_eq!(pkce.code_challenge, generate_code_challenge(&pkce.code_verifier));
    /// ```
    #[must_use]
    pub fn generate() -> Self {
        let code_verifier = generate_code_verifier();
        let code_challenge = generate_code_challenge(&code_verifier);
        Self { code_verifier, code_challenge }
    }

    /// Get the challenge method (always "S256")
    #[must_use]
    pub fn challenge_method(&self) -> &'static str {
        "S256"
    }
}

impl std::fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("code_verifier", &"<redacted>")
            .field("code_challenge", &self.code_challenge)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for auth::pkce.
    use super::*;

    /// Validates `PkceChallenge::generate` output shape.
    ///
    /// Assertions:
    /// - Ensures the verifier length is within 43..=128.
    /// - Ensures the challenge is non-empty.
    /// - Confirms `challenge_method()` equals `"S256"`.
    #[test]
    fn test_generate_pkce_challenge() {
        let pkce = PkceChallenge::generate();

        assert!(
            (43..=128).contains(&pkce.code_verifier.len()),
            "code_verifier length out of range: {}",
            pkce.code_verifier.len()
        );
        assert!(!pkce.code_challenge.is_empty());
        assert_eq!(pkce.challenge_method(), "S256");
    }

    /// Validates the RFC 7636 appendix B test vector.
    ///
    /// Assertions:
    /// - Confirms the derived challenge equals the published value.
    #[test]
    fn test_code_challenge_rfc_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            generate_code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    /// Validates that generated values are unique and URL safe.
    ///
    /// Assertions:
    /// - Confirms two states differ.
    /// - Ensures no padding or non-URL-safe characters appear.
    #[test]
    fn test_state_unique_and_urlsafe() {
        let first = generate_state();
        let second = generate_state();

        assert_ne!(first, second);
        for value in [&first, &second] {
            assert_eq!(value.len(), 43);
            assert!(value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }

    /// Validates `validate_state` comparisons.
    ///
    /// Assertions:
    /// - Ensures equal strings validate.
    /// - Ensures different contents and different lengths are rejected.
    #[test]
    fn test_validate_state() {
        let state = generate_state();

        assert!(validate_state(&state, &state.clone()));
        assert!(!validate_state(&state, "short"));
        assert!(!validate_state("abcd", "abce"));
        assert!(!validate_state("", "a"));
        assert!(validate_state("", ""));
    }

    /// Validates that the verifier never leaks through `Debug`.
    ///
    /// Assertions:
    /// - Ensures the formatted output omits the verifier.
    #[test]
    fn test_debug_redacts_verifier() {
        let pkce = PkceChallenge::generate();
        let rendered = format!("{pkce:?}");

        assert!(!rendered.contains(&pkce.code_verifier));
        assert!(rendered.contains("<redacted>"));
    }
}
