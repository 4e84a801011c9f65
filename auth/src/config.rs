use serde::{Deserialize, Serialize};

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// OIDC/OAuth2 providers, in precedence order for session discovery
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Hosted auth platform used for email/password sign-in
    pub hosted: Option<HostedConfig>,

    /// Storage, encryption and session lifetime settings
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            providers: vec![],
            hosted: None,
            security: SecurityConfig::default(),
        }
    }
}

/// Static per-provider configuration, immutable for the process lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider id used in routes and storage namespaces ("github", ...)
    pub id: String,

    /// Display name shown on the login screen
    pub name: String,

    pub authority: String,

    pub client_id: String,

    /// Confidential client secret. Only the backend tier may populate
    /// this; the browser tier leaves it unset and exchanges codes
    /// through the token relay instead.
    pub client_secret: Option<String>,

    pub redirect_uri: String,

    /// Space-separated scope string
    pub scope: String,

    #[serde(default = "default_response_type")]
    pub response_type: String,

    pub authorization_endpoint: String,

    /// Token endpoint. Points at the real provider on the backend tier,
    /// or at the relay (`/auth/{id}/token`) on the browser tier.
    pub token_endpoint: String,

    pub userinfo_endpoint: String,

    #[serde(default)]
    pub logo: Option<String>,
}

fn default_response_type() -> String {
    "code".to_string()
}

/// Hosted auth platform credentials (GoTrue-style HTTP API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedConfig {
    /// Base URL of the hosted project, without trailing slash
    pub base_url: String,

    /// Publishable API key sent as the `apikey` header
    pub anon_key: String,
}

/// Where encrypted blobs are persisted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageLifetime {
    /// Survives restarts (localStorage analog, file-backed)
    #[default]
    Persistent,
    /// Process-scoped (sessionStorage analog, in-memory)
    Session,
}

/// Process-wide security settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub storage: StorageLifetime,

    /// Directory for the persistent storage backend
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    /// Encrypt stored values with a key derived from `passphrase`
    #[serde(default)]
    pub encrypt_tokens: bool,

    /// Encryption passphrase. Must be supplied by the deployment (for
    /// example a server-issued per-session secret), never compiled in.
    #[serde(default)]
    pub passphrase: Option<String>,

    /// Absolute session lifetime in seconds (default: 30 minutes)
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Refresh the access token when it expires within this many
    /// seconds (default: 5 minutes)
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,
}

fn default_storage_dir() -> String {
    ".devtrack".to_string()
}

fn default_session_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_refresh_threshold() -> u64 {
    300 // 5 minutes
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            storage: StorageLifetime::default(),
            storage_dir: default_storage_dir(),
            encrypt_tokens: false,
            passphrase: None,
            session_timeout_secs: default_session_timeout(),
            refresh_threshold_secs: default_refresh_threshold(),
        }
    }
}

impl AuthConfig {
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }
}
