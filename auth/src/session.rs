use devtrack_common::TokenSet;
use serde::{Deserialize, Serialize};

/// Established user session; the single source of truth for "who is
/// logged in"
///
/// Created on successful callback handling (or hosted password sign-in)
/// and destroyed on sign-out or timeout. Persisted together with the
/// access token so neither can outlive the other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSession {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub avatar: Option<String>,
    /// Provider id that produced this session ("github", "email", ...)
    pub provider: String,
    pub tokens: TokenSet,
    /// Unix seconds at session creation; `created_at + session_timeout`
    /// is the absolute ejection deadline
    pub created_at: u64,
}

impl UserSession {
    pub fn is_expired(&self, now: u64, timeout_secs: u64) -> bool {
        now.saturating_sub(self.created_at) > timeout_secs
    }
}

/// Access token record with its fetch time, so expiry is computed from
/// when the token endpoint answered rather than from the current tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredAccessToken {
    pub token: String,
    pub expires_in: Option<u64>,
    pub stored_at: u64,
}

impl StoredAccessToken {
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_in.map(|ttl| self.stored_at.saturating_add(ttl))
    }
}

/// Capability interface over anything that can hold a signed-in session
///
/// Two implementations exist: the per-provider OIDC clients and the
/// hosted-auth integration. The auth service walks its sources in
/// precedence order at startup and treats the first valid session as the
/// current user.
pub trait SessionSource: Send + Sync {
    fn source_id(&self) -> &str;

    /// The stored session, if present and still valid. Implementations
    /// apply lazy expiry here (an expired session is cleared, not
    /// returned).
    fn valid_session(&self) -> Option<UserSession>;

    /// Drop the locally stored session. Network-side revocation, where a
    /// backend supports it, is a separate concern.
    fn clear_session(&self);
}
