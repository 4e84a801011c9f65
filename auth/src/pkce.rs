use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Verifier length in bytes; 32 bytes encode to 43 base64url characters,
/// within the RFC 7636 range of 43-128
const PKCE_VERIFIER_LENGTH: usize = 32;

const PKCE_METHOD: &str = "S256";

/// Generate a 128-bit cryptographically random token, base64url encoded
///
/// Used for the `state` and `nonce` parameters. Never deterministic.
pub fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// PKCE verifier/challenge pair (RFC 7636, S256 only)
#[derive(Debug, Clone)]
pub struct Pkce {
    /// Secret, sent during token exchange
    pub verifier: String,
    /// base64url(SHA-256(verifier)), sent in the authorization URL
    pub challenge: String,
    pub method: &'static str,
}

impl Pkce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; PKCE_VERIFIER_LENGTH];
        rand::thread_rng().fill(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = Self::compute_challenge(&verifier);

        Self {
            verifier,
            challenge,
            method: PKCE_METHOD,
        }
    }

    fn compute_challenge(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

/// Transient state for one authorization round-trip
///
/// Persisted at the start of `authorize()` and consumed inside
/// `handle_callback()`. At most one flow state is live per provider; a
/// new `authorize()` overwrites any stale one from an abandoned flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowState {
    /// Anti-CSRF value round-tripped through the redirect
    pub state: String,
    /// Replay-protection value associated with the ID token
    pub nonce: String,
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

impl FlowState {
    pub fn new() -> Self {
        let pkce = Pkce::generate();
        Self {
            state: random_token(),
            nonce: random_token(),
            code_verifier: pkce.verifier,
            code_challenge: pkce.challenge,
            code_challenge_method: pkce.method.to_string(),
        }
    }
}

impl Default for FlowState {
    fn default() -> Self {
        Self::new()
    }
}
