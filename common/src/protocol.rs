use serde::{Deserialize, Serialize};

/// Token set returned by an OAuth2/OIDC token endpoint
///
/// Produced by both the authorization_code and refresh_token grants.
/// Providers differ in which optional fields they populate: GitHub omits
/// `expires_in` unless token expiration is enabled, plain OIDC providers
/// usually send all of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenSet {
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Access token lifetime in seconds, counted from the moment the
    /// token endpoint responded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Error body returned by a token endpoint on a non-2xx response
/// (RFC 6749 §5.2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEndpointError {
    pub error: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl TokenEndpointError {
    /// Render the provider error as a single human-readable line
    pub fn message(&self) -> String {
        match &self.error_description {
            Some(desc) => format!("{}: {}", self.error, desc),
            None => self.error.clone(),
        }
    }
}

/// Grant type for a token endpoint request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
}

/// Public half of a token endpoint request, as relayed through the
/// backend tier
///
/// This is what the browser-side client is allowed to send: everything a
/// confidential client would send except the client secret. The relay
/// endpoint injects the secret before forwarding to the real provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrantForm {
    pub grant_type: GrantType,
    pub client_id: String,

    /// Authorization code (authorization_code grant only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Redirect URI the code was issued against (authorization_code grant only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// PKCE code verifier (authorization_code grant only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,

    /// Refresh token (refresh_token grant only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenGrantForm {
    pub fn authorization_code(
        client_id: impl Into<String>,
        code: impl Into<String>,
        redirect_uri: impl Into<String>,
        code_verifier: impl Into<String>,
    ) -> Self {
        Self {
            grant_type: GrantType::AuthorizationCode,
            client_id: client_id.into(),
            code: Some(code.into()),
            redirect_uri: Some(redirect_uri.into()),
            code_verifier: Some(code_verifier.into()),
            refresh_token: None,
        }
    }

    pub fn refresh_token(client_id: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            grant_type: GrantType::RefreshToken,
            client_id: client_id.into(),
            code: None,
            redirect_uri: None,
            code_verifier: None,
            refresh_token: Some(refresh_token.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_set_tolerates_missing_optionals() {
        let json = r#"{"access_token":"abc"}"#;
        let tokens: TokenSet = serde_json::from_str(json).unwrap();
        assert_eq!(tokens.access_token, "abc");
        assert!(tokens.expires_in.is_none());
        assert!(tokens.refresh_token.is_none());
    }

    #[test]
    fn grant_type_serializes_snake_case() {
        let form = TokenGrantForm::authorization_code("cid", "code123", "https://app/cb", "ver");
        let encoded = serde_json::to_value(&form).unwrap();
        assert_eq!(encoded["grant_type"], "authorization_code");
        // None fields must not appear in the form body
        assert!(encoded.get("refresh_token").is_none());
    }

    #[test]
    fn token_endpoint_error_message() {
        let err = TokenEndpointError {
            error: "invalid_grant".into(),
            error_description: Some("code expired".into()),
        };
        assert_eq!(err.message(), "invalid_grant: code expired");
    }
}
