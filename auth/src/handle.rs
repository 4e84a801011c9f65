use std::sync::Arc;

use tokio::sync::watch;

use crate::client::CallbackParams;
use crate::error::AuthError;
use crate::hosted::HOSTED_PROVIDER_ID;
use crate::service::{AuthService, Credentials, ListenerHandle, ProviderDescriptor, SignInOutcome};
use crate::session::UserSession;

/// Point-in-time view of the auth state, published over a watch channel
#[derive(Debug, Clone, Default)]
pub struct AuthSnapshot {
    pub user: Option<UserSession>,
    pub is_authenticated: bool,
    /// True while a sign-in or sign-out is in flight
    pub is_loading: bool,
    /// Human-readable reason for the last failed operation; cleared when
    /// the next operation starts
    pub error: Option<String>,
}

/// Observable facade over [`AuthService`] for UI consumers
///
/// Mirrors every auth-state transition into an [`AuthSnapshot`] watch
/// channel and wraps the mutating operations with loading/error
/// bookkeeping, so a frontend can render from the snapshot alone.
/// Subscriptions are torn down when the handle is dropped.
pub struct AuthHandle {
    service: Arc<AuthService>,
    snapshot: Arc<watch::Sender<AuthSnapshot>>,
    _listener: ListenerHandle,
    forwarder: Option<tokio::task::JoinHandle<()>>,
}

impl AuthHandle {
    /// Attach to a service, seeding the snapshot from its current user
    pub async fn attach(service: Arc<AuthService>) -> Self {
        let user = service.current_user().await;
        let (tx, _) = watch::channel(AuthSnapshot {
            is_authenticated: user.is_some(),
            user,
            ..AuthSnapshot::default()
        });
        let snapshot = Arc::new(tx);

        let listener = service.add_listener({
            let snapshot = snapshot.clone();
            move |user| {
                snapshot.send_modify(|s| {
                    s.user = user.cloned();
                    s.is_authenticated = user.is_some();
                });
            }
        });

        // Hosted-auth native notifications also flow into the snapshot.
        // A hosted sign-out must not clobber an OIDC session, so `None`
        // only applies while the current user is a hosted one.
        let forwarder = service.hosted_changes().map(|mut changes| {
            let snapshot = snapshot.clone();
            tokio::spawn(async move {
                while changes.changed().await.is_ok() {
                    let update = changes.borrow_and_update().clone();
                    snapshot.send_modify(|s| match update {
                        Some(session) => {
                            s.user = Some(session);
                            s.is_authenticated = true;
                        }
                        None => {
                            if s.user
                                .as_ref()
                                .is_some_and(|u| u.provider == HOSTED_PROVIDER_ID)
                            {
                                s.user = None;
                                s.is_authenticated = false;
                            }
                        }
                    });
                }
            })
        });

        Self {
            service,
            snapshot,
            _listener: listener,
            forwarder,
        }
    }

    /// Snapshot stream; `borrow()` gives the current state, `changed()`
    /// awaits the next transition
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.snapshot.borrow().clone()
    }

    pub async fn sign_in(
        &self,
        provider: &str,
        credentials: Credentials<'_>,
    ) -> Result<SignInOutcome, AuthError> {
        self.begin();
        let result = self.service.sign_in(provider, credentials).await;
        self.finish(provider, "sign_in_failed", result.as_ref().err())
            .await;
        result
    }

    pub async fn handle_callback(
        &self,
        provider: &str,
        params: &CallbackParams,
    ) -> Result<UserSession, AuthError> {
        self.begin();
        let result = self.service.handle_callback(provider, params).await;
        self.finish(provider, "callback_failed", result.as_ref().err())
            .await;
        result
    }

    pub async fn sign_out(&self) {
        self.begin();
        self.service.sign_out().await;
        self.snapshot.send_modify(|s| s.is_loading = false);
    }

    pub async fn refresh_session(&self) -> bool {
        self.service.refresh_session().await
    }

    pub async fn has_permission(&self, permission: &str) -> bool {
        self.service.has_permission(permission).await
    }

    pub fn available_providers(&self) -> Vec<ProviderDescriptor> {
        self.service.available_providers()
    }

    fn begin(&self) {
        self.snapshot.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
        });
    }

    async fn finish(&self, provider: &str, failure_event: &str, error: Option<&AuthError>) {
        if let Some(e) = error {
            let reason = e.to_string();
            self.service
                .log_security_event(
                    failure_event,
                    serde_json::json!({ "provider": provider, "error": reason }),
                )
                .await;
            self.snapshot.send_modify(|s| {
                s.is_loading = false;
                s.error = Some(reason);
            });
        } else {
            self.snapshot.send_modify(|s| s.is_loading = false);
        }
    }
}

impl Drop for AuthHandle {
    fn drop(&mut self) {
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
    }
}
