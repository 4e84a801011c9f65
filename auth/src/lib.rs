//! Authentication core for devtrack
//!
//! OIDC/OAuth2 authorization-code-with-PKCE clients for configured
//! providers, hosted email/password sign-in, encrypted session storage,
//! and an [`AuthService`] that reconciles all of it into one observable
//! session. Everything is explicitly constructed: callers inject the
//! storage backend and clock, which keeps the crate testable and free of
//! process-global state.

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod handle;
pub mod hosted;
pub mod pkce;
pub mod service;
pub mod session;
pub mod storage;

pub use client::{CallbackParams, OidcClient};
pub use clock::{SessionClock, SystemClock};
pub use config::{AuthConfig, HostedConfig, ProviderConfig, SecurityConfig, StorageLifetime};
pub use error::AuthError;
pub use handle::{AuthHandle, AuthSnapshot};
pub use hosted::{HostedAuth, HostedAuthClient, HOSTED_PROVIDER_ID};
pub use service::{
    AuthService, Credentials, ListenerHandle, ProviderDescriptor, SecurityEvent, SignInOutcome,
};
pub use session::{SessionSource, StoredAccessToken, UserSession};
pub use storage::{FileStore, MemoryStore, SecureStore, StoreCipher, Vault};
