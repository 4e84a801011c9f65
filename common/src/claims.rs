use serde::{Deserialize, Serialize};

/// Userinfo response, covering both OIDC userinfo endpoints and
/// GitHub-style `/user` APIs
///
/// OIDC providers return `sub`/`name`/`picture`; GitHub returns a numeric
/// `id` plus `login`/`avatar_url`. The accessors below pick whichever is
/// populated, preferring the provider-native field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Provider-local numeric or string identifier (GitHub sends a number)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

impl UserClaims {
    /// Stable subject identifier: `id` when present, else `sub`
    pub fn subject(&self) -> Option<String> {
        match &self.id {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => self.sub.clone(),
        }
    }

    /// Human-facing name: `name` when present, else the login handle
    pub fn display_name(&self) -> Option<String> {
        self.name.clone().or_else(|| self.login.clone())
    }

    /// Avatar URL: GitHub `avatar_url`, else OIDC `picture`
    pub fn avatar(&self) -> Option<String> {
        self.avatar_url.clone().or_else(|| self.picture.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_shaped_claims() {
        let json = r#"{"id":12345,"login":"octocat","avatar_url":"https://img/a.png"}"#;
        let claims: UserClaims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.subject().as_deref(), Some("12345"));
        assert_eq!(claims.display_name().as_deref(), Some("octocat"));
        assert_eq!(claims.avatar().as_deref(), Some("https://img/a.png"));
    }

    #[test]
    fn oidc_shaped_claims() {
        let json = r#"{"sub":"u-9","name":"Ada","picture":"https://img/p.png","email":"ada@example.com"}"#;
        let claims: UserClaims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.subject().as_deref(), Some("u-9"));
        assert_eq!(claims.display_name().as_deref(), Some("Ada"));
        assert_eq!(claims.avatar().as_deref(), Some("https://img/p.png"));
    }
}
