use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use url::Url;

use crate::client::{CallbackParams, OidcClient};
use crate::clock::SessionClock;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::hosted::{HostedAuth, HostedAuthClient, HOSTED_PROVIDER_ID};
use crate::session::{SessionSource, UserSession};
use crate::storage::{SecureStore, StoreCipher, Vault};

/// Cap on retained security events
const SECURITY_LOG_CAP: usize = 100;

type Listener = Box<dyn Fn(Option<&UserSession>) + Send + Sync>;

/// Ordered subscriber list with unsubscribe-by-handle semantics
#[derive(Default)]
struct ListenerRegistry {
    entries: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    fn subscribe(self: &Arc<Self>, listener: Listener) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((id, listener));
        }
        ListenerHandle {
            id,
            registry: Arc::downgrade(self),
        }
    }

    fn notify(&self, user: Option<&UserSession>) {
        if let Ok(entries) = self.entries.lock() {
            for (_, listener) in entries.iter() {
                listener(user);
            }
        }
    }

    fn remove(&self, id: u64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|(entry_id, _)| *entry_id != id);
        }
    }
}

/// Subscription handle returned by [`AuthService::add_listener`];
/// unsubscribes when dropped or via [`ListenerHandle::unsubscribe`]
pub struct ListenerHandle {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl ListenerHandle {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

/// Credentials accepted by [`AuthService::sign_in`]
#[derive(Debug, Clone, Copy)]
pub enum Credentials<'a> {
    /// Redirect-based OIDC sign-in, no upfront credentials
    None,
    /// Email/password sign-in through the hosted platform
    Password { email: &'a str, password: &'a str },
}

/// Result of a sign-in request
#[derive(Debug, Clone)]
pub enum SignInOutcome {
    /// Navigate the user to this authorization URL; the flow resumes at
    /// the callback route
    Redirect(Url),
    /// Signed in directly (password flow)
    SignedIn(UserSession),
}

/// Entry in the bounded security audit log
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub timestamp: u64,
    pub event: String,
    pub user: String,
    pub provider: String,
    pub details: serde_json::Value,
}

/// Provider descriptor for the login screen
#[derive(Debug, Clone, Serialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub name: String,
    pub logo: Option<String>,
}

/// Process-wide authentication service
///
/// Owns one OIDC client per configured provider plus the optional hosted
/// session source, holds the current user, and fans state transitions
/// out to subscribers. Explicitly constructed with injected storage and
/// clock; there is no module-level singleton.
///
/// All session mutations are serialized behind one async mutex so a
/// timer-triggered refresh and a user-triggered sign-out cannot
/// interleave partial writes.
pub struct AuthService {
    config: AuthConfig,
    clients: HashMap<String, OidcClient>,
    provider_order: Vec<String>,
    hosted: Option<HostedAuth>,
    current_user: RwLock<Option<UserSession>>,
    listeners: Arc<ListenerRegistry>,
    security_log: Mutex<VecDeque<SecurityEvent>>,
    clock: Arc<dyn SessionClock>,
    /// Bumped on every sign-in/sign-out so a superseded callback can
    /// detect that its flow is stale and skip committing
    flow_generation: AtomicU64,
    mutation_guard: tokio::sync::Mutex<()>,
}

impl AuthService {
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn SecureStore>,
        clock: Arc<dyn SessionClock>,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::new();

        let cipher = if config.security.encrypt_tokens {
            let passphrase = config.security.passphrase.as_deref().ok_or_else(|| {
                AuthError::Config("encrypt_tokens requires a passphrase".to_string())
            })?;
            Some(Arc::new(StoreCipher::from_passphrase(passphrase)))
        } else {
            None
        };

        let mut clients = HashMap::new();
        let mut provider_order = Vec::new();
        for provider in &config.providers {
            let vault = Vault::new(store.clone(), cipher.clone(), &provider.id);
            provider_order.push(provider.id.clone());
            clients.insert(
                provider.id.clone(),
                OidcClient::new(
                    provider.clone(),
                    config.security.clone(),
                    vault,
                    clock.clone(),
                    http.clone(),
                ),
            );
        }

        let hosted = config.hosted.clone().map(|hosted_config| {
            let vault = Vault::new(store.clone(), cipher.clone(), HOSTED_PROVIDER_ID);
            HostedAuth::new(
                HostedAuthClient::new(hosted_config, http.clone()),
                vault,
                clock.clone(),
                config.security.clone(),
            )
        });

        Ok(Self {
            config,
            clients,
            provider_order,
            hosted,
            current_user: RwLock::new(None),
            listeners: Arc::new(ListenerRegistry::default()),
            security_log: Mutex::new(VecDeque::new()),
            clock,
            flow_generation: AtomicU64::new(0),
            mutation_guard: tokio::sync::Mutex::new(()),
        })
    }

    /// Restore an existing session from storage, if any
    ///
    /// Sources are consulted in precedence order: configured OIDC
    /// providers first (in configuration order), the hosted platform
    /// last. The first source reporting a valid session wins.
    pub async fn initialize_session(&self) {
        let _guard = self.mutation_guard.lock().await;

        for source in self.session_sources() {
            if let Some(session) = source.valid_session() {
                tracing::info!(provider = source.source_id(), user = %session.id, "restored session");
                self.commit_user(Some(session)).await;
                self.log_security_event("session_restored", serde_json::json!({})).await;
                return;
            }
        }
    }

    fn session_sources(&self) -> impl Iterator<Item = &dyn SessionSource> {
        self.provider_order
            .iter()
            .filter_map(|id| self.clients.get(id).map(|c| c as &dyn SessionSource))
            .chain(self.hosted.iter().map(|h| h as &dyn SessionSource))
    }

    /// Register an auth-state observer; invoked synchronously, in
    /// subscription order, with the new user (or `None`) on every
    /// transition
    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(Option<&UserSession>) + Send + Sync + 'static,
    {
        self.listeners.subscribe(Box::new(listener))
    }

    /// Start a sign-in with the given provider
    ///
    /// The `email` pseudo-provider short-circuits to hosted password
    /// sign-in; every other id must name a configured OIDC provider and
    /// yields an authorization URL to redirect to.
    pub async fn sign_in(
        &self,
        provider: &str,
        credentials: Credentials<'_>,
    ) -> Result<SignInOutcome, AuthError> {
        if provider == HOSTED_PROVIDER_ID {
            let Credentials::Password { email, password } = credentials else {
                return Err(AuthError::Config(
                    "email sign-in requires credentials".to_string(),
                ));
            };
            let hosted = self
                .hosted
                .as_ref()
                .ok_or_else(|| AuthError::Config("hosted auth not configured".to_string()))?;

            let _guard = self.mutation_guard.lock().await;
            self.flow_generation.fetch_add(1, Ordering::SeqCst);
            let session = hosted.sign_in_with_password(email, password).await?;
            self.commit_user(Some(session.clone())).await;
            self.log_security_event("sign_in", serde_json::json!({ "provider": provider }))
                .await;
            return Ok(SignInOutcome::SignedIn(session));
        }

        let client = self
            .clients
            .get(provider)
            .ok_or_else(|| AuthError::UnknownProvider(provider.to_string()))?;
        self.flow_generation.fetch_add(1, Ordering::SeqCst);
        let url = client.authorize()?;
        self.log_security_event("sign_in_attempt", serde_json::json!({ "provider": provider }))
            .await;
        Ok(SignInOutcome::Redirect(url))
    }

    /// Complete an authorization-code flow from callback parameters
    pub async fn handle_callback(
        &self,
        provider: &str,
        params: &CallbackParams,
    ) -> Result<UserSession, AuthError> {
        let client = self
            .clients
            .get(provider)
            .ok_or_else(|| AuthError::UnknownProvider(provider.to_string()))?;

        let _guard = self.mutation_guard.lock().await;
        let generation = self.flow_generation.load(Ordering::SeqCst);

        let session = match client.handle_callback(params).await {
            Ok(session) => session,
            Err(e) => {
                self.log_security_event(
                    "sign_in_failed",
                    serde_json::json!({ "provider": provider, "error": e.to_string() }),
                )
                .await;
                return Err(e);
            }
        };

        if self.flow_generation.load(Ordering::SeqCst) != generation {
            // A newer sign-in or sign-out superseded this flow while the
            // exchange was in flight; its result is ignored, and the
            // session the client already persisted must not survive to
            // be restored on a later startup
            tracing::debug!(provider, "callback result superseded, not committing");
            client.clear_session();
            return Ok(session);
        }

        self.commit_user(Some(session.clone())).await;
        self.log_security_event("sign_in", serde_json::json!({ "provider": provider }))
            .await;
        Ok(session)
    }

    /// Sign the current user out. Safe to call repeatedly.
    pub async fn sign_out(&self) {
        let _guard = self.mutation_guard.lock().await;
        self.flow_generation.fetch_add(1, Ordering::SeqCst);

        let Some(user) = self.current_user.read().await.clone() else {
            return;
        };

        if user.provider == HOSTED_PROVIDER_ID {
            if let Some(hosted) = &self.hosted {
                hosted.sign_out().await;
            }
        } else if let Some(client) = self.clients.get(&user.provider) {
            client.sign_out();
        }

        self.log_security_event("sign_out", serde_json::json!({ "provider": user.provider }))
            .await;
        self.commit_user(None).await;
    }

    pub async fn current_user(&self) -> Option<UserSession> {
        self.current_user.read().await.clone()
    }

    /// True while the current user's backing source still reports a
    /// valid session; detecting invalidity clears the current user
    pub async fn is_authenticated(&self) -> bool {
        let Some(user) = self.current_user.read().await.clone() else {
            return false;
        };

        let valid = if user.provider == HOSTED_PROVIDER_ID {
            self.hosted
                .as_ref()
                .is_some_and(|h| h.valid_session().is_some())
        } else {
            self.clients
                .get(&user.provider)
                .is_some_and(|c| c.is_authenticated())
        };

        if !valid {
            let _guard = self.mutation_guard.lock().await;
            self.log_security_event("session_expired", serde_json::json!({})).await;
            self.commit_user(None).await;
        }
        valid
    }

    /// Validate the current session and refresh its access token when
    /// close to expiry; returns false when the user must re-authenticate
    pub async fn refresh_session(&self) -> bool {
        let Some(user) = self.current_user.read().await.clone() else {
            return false;
        };

        let valid = if user.provider == HOSTED_PROVIDER_ID {
            self.hosted
                .as_ref()
                .is_some_and(|h| h.valid_session().is_some())
        } else {
            match self.clients.get(&user.provider) {
                Some(client) => client.validate_and_refresh().await,
                None => false,
            }
        };

        if !valid {
            let _guard = self.mutation_guard.lock().await;
            self.log_security_event("session_invalidated", serde_json::json!({})).await;
            self.commit_user(None).await;
        }
        valid
    }

    /// Permission set derived from the current session: a base
    /// read/write pair plus provider-specific extras. Pure function of
    /// the session, no I/O.
    pub async fn permissions(&self) -> Vec<&'static str> {
        let Some(user) = self.current_user.read().await.clone() else {
            return vec![];
        };

        let mut permissions = vec!["read", "write"];
        permissions.extend_from_slice(provider_permissions(&user.provider));
        permissions
    }

    pub async fn has_permission(&self, permission: &str) -> bool {
        self.permissions().await.contains(&permission)
    }

    /// Providers to offer on the login screen, hosted email sign-in last
    pub fn available_providers(&self) -> Vec<ProviderDescriptor> {
        let mut providers: Vec<ProviderDescriptor> = self
            .config
            .providers
            .iter()
            .map(|p| ProviderDescriptor {
                id: p.id.clone(),
                name: p.name.clone(),
                logo: p.logo.clone(),
            })
            .collect();
        if self.hosted.is_some() {
            providers.push(ProviderDescriptor {
                id: HOSTED_PROVIDER_ID.to_string(),
                name: "Email".to_string(),
                logo: None,
            });
        }
        providers
    }

    /// Native change notifications from the hosted platform, if
    /// configured
    pub fn hosted_changes(&self) -> Option<tokio::sync::watch::Receiver<Option<UserSession>>> {
        self.hosted.as_ref().map(|h| h.on_change())
    }

    /// Append to the bounded security audit log. Never fails; logging
    /// must not affect auth flows.
    pub async fn log_security_event(&self, event: &str, details: serde_json::Value) {
        let user = self.current_user.read().await.clone();
        let entry = SecurityEvent {
            timestamp: self.clock.now_unix(),
            event: event.to_string(),
            user: user
                .as_ref()
                .map(|u| u.id.clone())
                .unwrap_or_else(|| "anonymous".to_string()),
            provider: user
                .as_ref()
                .map(|u| u.provider.clone())
                .unwrap_or_else(|| "none".to_string()),
            details,
        };

        #[cfg(debug_assertions)]
        tracing::debug!(event = %entry.event, user = %entry.user, "security event");

        if let Ok(mut log) = self.security_log.lock() {
            if log.len() == SECURITY_LOG_CAP {
                log.pop_front();
            }
            log.push_back(entry);
        }
    }

    pub fn security_events(&self) -> Vec<SecurityEvent> {
        self.security_log
            .lock()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Spawn the periodic session validation task
    ///
    /// Every tick revalidates and refreshes the active session; any
    /// failure inside a tick resolves to a sign-out, never an unhandled
    /// error.
    pub fn start_session_validation(
        self: &Arc<Self>,
        period: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a fresh start
            // does not race session initialization
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if service.is_authenticated().await && !service.refresh_session().await {
                    tracing::info!("periodic validation signed the user out");
                }
            }
        })
    }

    async fn commit_user(&self, user: Option<UserSession>) {
        {
            let mut current = self.current_user.write().await;
            *current = user.clone();
        }
        self.listeners.notify(user.as_ref());
    }
}

/// Static provider-to-extra-permissions table
fn provider_permissions(provider: &str) -> &'static [&'static str] {
    match provider {
        "github" => &["repo_access", "code_review"],
        "netlify" => &["deploy", "site_management"],
        _ => &[],
    }
}
