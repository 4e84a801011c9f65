use std::sync::Arc;

use devtrack_common::{TokenEndpointError, TokenSet, UserClaims};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::clock::SessionClock;
use crate::config::{ProviderConfig, SecurityConfig};
use crate::error::AuthError;
use crate::pkce::FlowState;
use crate::session::{SessionSource, StoredAccessToken, UserSession};
use crate::storage::Vault;

use crate::storage::keys::{
    ACCESS_TOKEN as KEY_ACCESS_TOKEN, OIDC_CODE_VERIFIER as KEY_VERIFIER,
    OIDC_NONCE as KEY_NONCE, OIDC_STATE as KEY_STATE, REFRESH_TOKEN as KEY_REFRESH_TOKEN,
    USER_SESSION as KEY_SESSION,
};

/// Query parameters delivered to the callback route
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Authorization-code-with-PKCE client for one configured provider
///
/// Owns the provider configuration and a namespaced vault; all session
/// and transient state lives in the vault so validity checks are a pure
/// function of storage plus the injected clock.
pub struct OidcClient {
    provider: ProviderConfig,
    security: SecurityConfig,
    vault: Vault,
    clock: Arc<dyn SessionClock>,
    http: reqwest::Client,
}

impl OidcClient {
    pub fn new(
        provider: ProviderConfig,
        security: SecurityConfig,
        vault: Vault,
        clock: Arc<dyn SessionClock>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            provider,
            security,
            vault,
            clock,
            http,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider.id
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Begin an authorization flow: generate and persist fresh
    /// state/nonce/PKCE (overwriting any stale flow) and build the
    /// authorization URL
    ///
    /// The caller performs the actual redirect; from this page's point
    /// of view the operation is terminal.
    pub fn authorize(&self) -> Result<Url, AuthError> {
        let flow = FlowState::new();

        self.vault.store(KEY_STATE, &flow.state)?;
        self.vault.store(KEY_NONCE, &flow.nonce)?;
        self.vault.store(KEY_VERIFIER, &flow.code_verifier)?;

        let mut url = Url::parse(&self.provider.authorization_endpoint)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.provider.client_id)
            .append_pair("redirect_uri", &self.provider.redirect_uri)
            .append_pair("response_type", &self.provider.response_type)
            .append_pair("scope", &self.provider.scope)
            .append_pair("state", &flow.state)
            .append_pair("nonce", &flow.nonce)
            .append_pair("code_challenge", &flow.code_challenge)
            .append_pair("code_challenge_method", &flow.code_challenge_method);

        tracing::info!(provider = %self.provider.id, "starting authorization flow");
        Ok(url)
    }

    /// Complete the flow: validate the callback, exchange the code,
    /// fetch userinfo and establish the session
    ///
    /// PKCE transients are cleared on every exit path, success or
    /// failure, so no half-completed flow state survives.
    pub async fn handle_callback(&self, params: &CallbackParams) -> Result<UserSession, AuthError> {
        let result = self.process_callback(params).await;
        self.clear_flow_state();
        if let Err(e) = &result {
            tracing::warn!(provider = %self.provider.id, error = %e, "callback handling failed");
        }
        result
    }

    async fn process_callback(&self, params: &CallbackParams) -> Result<UserSession, AuthError> {
        if let Some(error) = &params.error {
            let reason = match &params.error_description {
                Some(desc) => format!("{error}: {desc}"),
                None => error.clone(),
            };
            return Err(AuthError::Authorization(reason));
        }

        let (code, state) = match (&params.code, &params.state) {
            (Some(code), Some(state)) => (code, state),
            _ => return Err(AuthError::MalformedCallback),
        };

        let stored_state: Option<String> = self.vault.retrieve(KEY_STATE);
        if stored_state.as_deref() != Some(state.as_str()) {
            return Err(AuthError::StateMismatch);
        }

        let tokens = self.exchange_code(code).await?;
        let claims = self.user_info(&tokens.access_token).await?;
        let now = self.clock.now_unix();

        let session = UserSession {
            id: claims
                .subject()
                .ok_or_else(|| AuthError::UserInfo("userinfo has no subject".to_string()))?,
            name: claims
                .display_name()
                .unwrap_or_else(|| self.provider.id.clone()),
            email: claims.email.clone(),
            avatar: claims.avatar(),
            provider: self.provider.id.clone(),
            tokens: tokens.clone(),
            created_at: now,
        };

        self.persist_session(&session, &tokens, now)?;
        tracing::info!(provider = %self.provider.id, user = %session.id, "session established");
        Ok(session)
    }

    /// Exchange an authorization code for tokens (RFC 6749 §4.1.3)
    ///
    /// On the browser tier the configured token endpoint is the backend
    /// relay and no client secret is sent; the relay injects it.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet, AuthError> {
        let verifier: String = self
            .vault
            .retrieve(KEY_VERIFIER)
            .ok_or_else(|| AuthError::TokenExchange("no code verifier stored".to_string()))?;

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.provider.redirect_uri),
            ("client_id", &self.provider.client_id),
            ("code_verifier", &verifier),
        ];
        if let Some(secret) = &self.provider.client_secret {
            form.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(&self.provider.token_endpoint)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<TokenEndpointError>(&body) {
                Ok(err) => err.message(),
                Err(_) => format!("token endpoint returned {status}"),
            };
            return Err(AuthError::TokenExchange(reason));
        }

        Ok(response.json().await?)
    }

    /// Fetch userinfo with a bearer token
    pub async fn user_info(&self, access_token: &str) -> Result<UserClaims, AuthError> {
        let response = self
            .http
            .get(&self.provider.userinfo_endpoint)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .header("User-Agent", "devtrack-auth")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::UserInfo(format!(
                "userinfo endpoint returned {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    /// Mint a new access token from the stored refresh token
    ///
    /// Persists the new access token (and the rotated refresh token when
    /// the provider sends one). Callers should treat any error as "must
    /// re-authenticate".
    pub async fn refresh_access_token(&self) -> Result<TokenSet, AuthError> {
        let refresh_token: String = self
            .vault
            .retrieve(KEY_REFRESH_TOKEN)
            .ok_or_else(|| AuthError::Refresh("no refresh token available".to_string()))?;

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", &refresh_token),
            ("client_id", &self.provider.client_id),
        ];
        if let Some(secret) = &self.provider.client_secret {
            form.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(&self.provider.token_endpoint)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<TokenEndpointError>(&body) {
                Ok(err) => err.message(),
                Err(_) => format!("token endpoint returned {status}"),
            };
            return Err(AuthError::Refresh(reason));
        }

        let tokens: TokenSet = response.json().await?;
        let now = self.clock.now_unix();

        self.vault.store(
            KEY_ACCESS_TOKEN,
            &StoredAccessToken {
                token: tokens.access_token.clone(),
                expires_in: tokens.expires_in,
                stored_at: now,
            },
        )?;
        if let Some(rotated) = &tokens.refresh_token {
            self.vault.store(KEY_REFRESH_TOKEN, rotated)?;
        }
        // Keep the session copy of the tokens in step with storage
        if let Some(mut session) = self.current_user() {
            session.tokens = tokens.clone();
            self.vault.store(KEY_SESSION, &session)?;
        }

        tracing::debug!(provider = %self.provider.id, "access token refreshed");
        Ok(tokens)
    }

    /// Clear session, tokens and any flow transients. Idempotent, no
    /// network call.
    pub fn sign_out(&self) {
        self.clear_stored_session();
        self.clear_flow_state();
    }

    /// Clear session and tokens but leave flow transients alone, so a
    /// newer in-flight authorization round-trip is not broken
    fn clear_stored_session(&self) {
        self.vault.clear(KEY_SESSION);
        self.vault.clear(KEY_ACCESS_TOKEN);
        self.vault.clear(KEY_REFRESH_TOKEN);
    }

    pub fn current_user(&self) -> Option<UserSession> {
        self.vault.retrieve(KEY_SESSION)
    }

    /// True only while a session and access token both exist and the
    /// absolute session deadline has not passed
    ///
    /// Detecting a passed deadline signs the user out as a side effect
    /// (lazy expiry).
    pub fn is_authenticated(&self) -> bool {
        let Some(session) = self.current_user() else {
            return false;
        };
        if self
            .vault
            .retrieve::<StoredAccessToken>(KEY_ACCESS_TOKEN)
            .is_none()
        {
            return false;
        }

        if session.is_expired(self.clock.now_unix(), self.security.session_timeout_secs) {
            tracing::info!(provider = %self.provider.id, "session timed out, signing out");
            self.sign_out();
            return false;
        }

        true
    }

    /// Refresh the access token when it is close to expiry
    ///
    /// Returns false when the caller must re-authenticate. The refresh
    /// fires strictly inside the threshold (`expires_at - now <
    /// threshold`, not `<=`); a token already past `expires_at` is
    /// treated as expired and forces sign-out rather than a refresh
    /// attempt.
    pub async fn validate_and_refresh(&self) -> bool {
        if !self.is_authenticated() {
            return false;
        }
        let Some(stored) = self.vault.retrieve::<StoredAccessToken>(KEY_ACCESS_TOKEN) else {
            return false;
        };
        let Some(expires_at) = stored.expires_at() else {
            // Provider did not give the token a lifetime
            return true;
        };

        let now = self.clock.now_unix();
        if now >= expires_at {
            tracing::info!(provider = %self.provider.id, "access token expired, signing out");
            self.sign_out();
            return false;
        }
        if expires_at - now < self.security.refresh_threshold_secs {
            match self.refresh_access_token().await {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(provider = %self.provider.id, error = %e, "refresh failed, signing out");
                    self.sign_out();
                    false
                }
            }
        } else {
            true
        }
    }

    fn persist_session(
        &self,
        session: &UserSession,
        tokens: &TokenSet,
        now: u64,
    ) -> Result<(), AuthError> {
        self.vault.store(KEY_SESSION, session)?;
        self.vault.store(
            KEY_ACCESS_TOKEN,
            &StoredAccessToken {
                token: tokens.access_token.clone(),
                expires_in: tokens.expires_in,
                stored_at: now,
            },
        )?;
        if let Some(refresh) = &tokens.refresh_token {
            self.vault.store(KEY_REFRESH_TOKEN, refresh)?;
        }
        Ok(())
    }

    fn clear_flow_state(&self) {
        self.vault.clear(KEY_STATE);
        self.vault.clear(KEY_NONCE);
        self.vault.clear(KEY_VERIFIER);
    }

    #[cfg(test)]
    fn stored_state(&self) -> Option<String> {
        self.vault.retrieve(KEY_STATE)
    }
}

impl SessionSource for OidcClient {
    fn source_id(&self) -> &str {
        &self.provider.id
    }

    fn valid_session(&self) -> Option<UserSession> {
        if self.is_authenticated() {
            self.current_user()
        } else {
            None
        }
    }

    fn clear_session(&self) {
        self.clear_stored_session();
    }
}
