use std::sync::Arc;

use devtrack_common::TokenSet;
use serde::Deserialize;
use tokio::sync::watch;

use crate::clock::SessionClock;
use crate::config::{HostedConfig, SecurityConfig};
use crate::error::AuthError;
use crate::session::{SessionSource, StoredAccessToken, UserSession};
use crate::storage::keys;
use crate::storage::Vault;

/// Pseudo-provider id under which hosted email/password sessions are
/// stored and reported
pub const HOSTED_PROVIDER_ID: &str = "email";

/// Session payload returned by the hosted auth platform's token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct HostedSession {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: HostedUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostedUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: HostedUserMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostedUserMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Error body shapes the hosted platform uses across endpoints
#[derive(Debug, Deserialize)]
struct HostedErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

impl HostedErrorBody {
    fn message(&self, fallback: &str) -> String {
        self.error_description
            .clone()
            .or_else(|| self.msg.clone())
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Thin HTTP client for the hosted auth platform (GoTrue-style API)
pub struct HostedAuthClient {
    config: HostedConfig,
    http: reqwest::Client,
}

impl HostedAuthClient {
    pub fn new(config: HostedConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<HostedSession, AuthError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.config.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<HostedErrorBody>(&body)
                .map(|e| e.message(status.as_str()))
                .unwrap_or_else(|_| format!("hosted sign-in returned {status}"));
            return Err(AuthError::Authorization(reason));
        }

        Ok(response.json().await?)
    }

    pub async fn fetch_user(&self, access_token: &str) -> Result<HostedUser, AuthError> {
        let url = format!("{}/auth/v1/user", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::UserInfo(format!(
                "hosted user endpoint returned {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    pub async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let url = format!("{}/auth/v1/logout", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::Authorization(format!(
                "hosted sign-out returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Hosted-auth session source: wraps the HTTP client with local session
/// persistence and native change notifications
///
/// Stored under the `email` namespace with the same key layout as the
/// OIDC clients, so the two kinds of source are interchangeable behind
/// [`SessionSource`].
pub struct HostedAuth {
    client: HostedAuthClient,
    vault: Vault,
    clock: Arc<dyn SessionClock>,
    security: SecurityConfig,
    changes: watch::Sender<Option<UserSession>>,
}

impl HostedAuth {
    pub fn new(
        client: HostedAuthClient,
        vault: Vault,
        clock: Arc<dyn SessionClock>,
        security: SecurityConfig,
    ) -> Self {
        let (changes, _) = watch::channel(None);
        Self {
            client,
            vault,
            clock,
            security,
            changes,
        }
    }

    /// Native session-change notifications, independent of the auth
    /// service's own listener fan-out
    pub fn on_change(&self) -> watch::Receiver<Option<UserSession>> {
        self.changes.subscribe()
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserSession, AuthError> {
        let hosted = self.client.sign_in_with_password(email, password).await?;
        let now = self.clock.now_unix();

        let tokens = TokenSet {
            access_token: hosted.access_token.clone(),
            token_type: hosted.token_type.clone(),
            expires_in: hosted.expires_in,
            refresh_token: hosted.refresh_token.clone(),
            scope: None,
        };
        let session = UserSession {
            id: hosted.user.id.clone(),
            name: hosted
                .user
                .user_metadata
                .name
                .clone()
                .or_else(|| hosted.user.email.clone())
                .unwrap_or_else(|| hosted.user.id.clone()),
            email: hosted.user.email.clone(),
            avatar: hosted.user.user_metadata.avatar_url.clone(),
            provider: HOSTED_PROVIDER_ID.to_string(),
            tokens: tokens.clone(),
            created_at: now,
        };

        self.vault.store(keys::USER_SESSION, &session)?;
        self.vault.store(
            keys::ACCESS_TOKEN,
            &StoredAccessToken {
                token: tokens.access_token.clone(),
                expires_in: tokens.expires_in,
                stored_at: now,
            },
        )?;
        if let Some(refresh) = &tokens.refresh_token {
            self.vault.store(keys::REFRESH_TOKEN, refresh)?;
        }

        tracing::info!(user = %session.id, "hosted sign-in succeeded");
        let _ = self.changes.send(Some(session.clone()));
        Ok(session)
    }

    /// Revoke server-side when possible, then clear the local session.
    /// Local state is cleared even when revocation fails.
    pub async fn sign_out(&self) {
        if let Some(stored) = self.vault.retrieve::<StoredAccessToken>(keys::ACCESS_TOKEN) {
            if let Err(e) = self.client.sign_out(&stored.token).await {
                tracing::warn!(error = %e, "hosted sign-out revocation failed");
            }
        }
        self.clear_session();
        let _ = self.changes.send(None);
    }
}

impl SessionSource for HostedAuth {
    fn source_id(&self) -> &str {
        HOSTED_PROVIDER_ID
    }

    fn valid_session(&self) -> Option<UserSession> {
        let session: UserSession = self.vault.retrieve(keys::USER_SESSION)?;
        self.vault
            .retrieve::<StoredAccessToken>(keys::ACCESS_TOKEN)?;
        if session.is_expired(self.clock.now_unix(), self.security.session_timeout_secs) {
            self.clear_session();
            return None;
        }
        Some(session)
    }

    fn clear_session(&self) {
        self.vault.clear(keys::USER_SESSION);
        self.vault.clear(keys::ACCESS_TOKEN);
        self.vault.clear(keys::REFRESH_TOKEN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hosted_with(base: &str, clock: Arc<ManualClock>) -> HostedAuth {
        let client = HostedAuthClient::new(
            HostedConfig {
                base_url: base.to_string(),
                anon_key: "anon-key".to_string(),
            },
            reqwest::Client::new(),
        );
        let vault = Vault::new(Arc::new(MemoryStore::new()), None, HOSTED_PROVIDER_ID);
        HostedAuth::new(client, vault, clock, SecurityConfig::default())
    }

    #[tokio::test]
    async fn password_sign_in_establishes_session_and_notifies() {
        let server = MockServer::start().await;
        let clock = Arc::new(ManualClock::new(2_000));
        let hosted = hosted_with(&server.uri(), clock);
        let mut changes = hosted.on_change();

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(header("apikey", "anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "hat-1",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "hrt-1",
                "user": {
                    "id": "u-1",
                    "email": "ada@example.com",
                    "user_metadata": { "name": "Ada" }
                }
            })))
            .mount(&server)
            .await;

        let session = hosted
            .sign_in_with_password("ada@example.com", "pw")
            .await
            .unwrap();
        assert_eq!(session.provider, "email");
        assert_eq!(session.name, "Ada");
        assert_eq!(hosted.valid_session(), Some(session.clone()));

        assert!(changes.has_changed().unwrap());
        assert_eq!(changes.borrow_and_update().as_ref(), Some(&session));
    }

    #[tokio::test]
    async fn bad_password_surfaces_provider_message() {
        let server = MockServer::start().await;
        let clock = Arc::new(ManualClock::new(2_000));
        let hosted = hosted_with(&server.uri(), clock);

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let err = hosted
            .sign_in_with_password("ada@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid login credentials"));
        assert!(hosted.valid_session().is_none());
    }

    #[tokio::test]
    async fn hosted_session_expires_lazily() {
        let server = MockServer::start().await;
        let clock = Arc::new(ManualClock::new(2_000));
        let hosted = hosted_with(&server.uri(), clock.clone());

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "hat-1",
                "user": { "id": "u-1", "email": "ada@example.com" }
            })))
            .mount(&server)
            .await;

        hosted
            .sign_in_with_password("ada@example.com", "pw")
            .await
            .unwrap();
        assert!(hosted.valid_session().is_some());

        clock.advance(1801);
        assert!(hosted.valid_session().is_none());
    }

    #[tokio::test]
    async fn sign_out_revokes_and_clears() {
        let server = MockServer::start().await;
        let clock = Arc::new(ManualClock::new(2_000));
        let hosted = hosted_with(&server.uri(), clock);

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "hat-1",
                "user": { "id": "u-1" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("Authorization", "Bearer hat-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        hosted.sign_in_with_password("x", "pw").await.unwrap();
        hosted.sign_out().await;
        assert!(hosted.valid_session().is_none());
        // Second sign-out is a no-op
        hosted.sign_out().await;
    }
}
