use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;

use crate::error::AuthError;

/// Logical storage keys, namespaced per provider by the [`Vault`]
pub mod keys {
    pub const OIDC_STATE: &str = "oidc_state";
    pub const OIDC_NONCE: &str = "oidc_nonce";
    pub const OIDC_CODE_VERIFIER: &str = "oidc_code_verifier";
    pub const USER_SESSION: &str = "user_session";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
}

/// Key-value persistence for small auth blobs (tokens, sessions, PKCE
/// transients)
///
/// Values are serialized JSON strings, optionally encrypted by the
/// [`Vault`] layered on top. Backends differ only in lifetime:
/// [`FileStore`] survives restarts, [`MemoryStore`] is process-scoped.
pub trait SecureStore: Send + Sync {
    fn store(&self, key: &str, value: &str) -> Result<(), AuthError>;

    fn retrieve(&self, key: &str) -> Option<String>;

    fn clear(&self, key: &str);
}

/// Process-lifetime storage; the sessionStorage analog and test backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStore for MemoryStore {
    fn store(&self, key: &str, value: &str) -> Result<(), AuthError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AuthError::Storage("storage lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn clear(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

/// File-backed storage, one file per key; the localStorage analog
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| AuthError::Storage(format!("failed to create {}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are dotted identifiers; anything else is flattened so a
        // key can never escape the storage directory
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl SecureStore for FileStore {
    fn store(&self, key: &str, value: &str) -> Result<(), AuthError> {
        let path = self.path_for(key);
        std::fs::write(&path, value)
            .map_err(|e| AuthError::Storage(format!("failed to write {}: {}", path.display(), e)))
    }

    fn retrieve(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn clear(&self, key: &str) {
        let _ = std::fs::remove_file(self.path_for(key));
    }
}

const NONCE_LEN: usize = 12;
const PBKDF2_ITERATIONS: u32 = 100_000;
const PBKDF2_SALT: &[u8] = b"devtrack-secure-store";

/// AES-256-GCM cipher keyed from a deployment-supplied passphrase
///
/// The passphrase comes from configuration (a server-issued secret),
/// never from a source literal.
pub struct StoreCipher {
    key: [u8; 32],
}

impl StoreCipher {
    pub fn from_passphrase(passphrase: &str) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), PBKDF2_SALT, PBKDF2_ITERATIONS, &mut key);
        Self { key }
    }

    /// Encrypt to base64url(nonce || ciphertext)
    pub fn seal(&self, plaintext: &str) -> Result<String, AuthError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| AuthError::Storage("encryption failed".to_string()))?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    /// Decrypt; any corruption or tampering yields `None`
    pub fn open(&self, sealed: &str) -> Option<String> {
        let blob = URL_SAFE_NO_PAD.decode(sealed).ok()?;
        if blob.len() <= NONCE_LEN {
            return None;
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher.decrypt(Nonce::from_slice(nonce), ciphertext).ok()?;
        String::from_utf8(plaintext).ok()
    }
}

/// Typed, optionally encrypted view over a [`SecureStore`], namespaced
/// per provider
///
/// A corrupted or tampered entry degrades to "not stored" rather than an
/// error, so a bad blob demotes the user to unauthenticated instead of
/// crashing the app.
#[derive(Clone)]
pub struct Vault {
    store: Arc<dyn SecureStore>,
    cipher: Option<Arc<StoreCipher>>,
    namespace: String,
}

impl Vault {
    pub fn new(
        store: Arc<dyn SecureStore>,
        cipher: Option<Arc<StoreCipher>>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cipher,
            namespace: namespace.into(),
        }
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}.{}", self.namespace, key)
    }

    pub fn store<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AuthError> {
        let json = serde_json::to_string(value)?;
        let payload = match &self.cipher {
            Some(cipher) => cipher.seal(&json)?,
            None => json,
        };
        self.store.store(&self.scoped(key), &payload)
    }

    pub fn retrieve<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.store.retrieve(&self.scoped(key))?;
        let json = match &self.cipher {
            Some(cipher) => match cipher.open(&payload) {
                Some(json) => json,
                None => {
                    tracing::warn!(key, "failed to decrypt stored value, treating as absent");
                    return None;
                }
            },
            None => payload,
        };
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to parse stored value, treating as absent");
                None
            }
        }
    }

    pub fn clear(&self, key: &str) {
        self.store.clear(&self.scoped(key));
    }
}
