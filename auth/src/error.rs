use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Provider returned an `error` parameter on the callback redirect
    #[error("authorization error: {0}")]
    Authorization(String),

    #[error("missing authorization code or state in callback")]
    MalformedCallback,

    /// CSRF check failed: the callback state does not match the stored one
    #[error("state parameter does not match the stored value")]
    StateMismatch,

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("userinfo request failed: {0}")]
    UserInfo(String),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("session expired")]
    SessionExpired,

    #[error("not authenticated")]
    NotAuthenticated,
}
