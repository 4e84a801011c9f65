use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use devtrack_common::{GrantType, TokenGrantForm};

use crate::state::AppState;

/// RFC 6749 §5.2 style error body
fn oauth_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": error,
            "error_description": description,
        })),
    )
        .into_response()
}

/// Token relay for browser-tier clients: `POST /auth/{provider}/token`
///
/// Accepts the public half of a token request, injects the confidential
/// client secret and forwards it to the provider's real token endpoint.
/// The upstream status and JSON body are piped back unchanged, so from
/// the client's point of view this behaves exactly like the provider,
/// minus the secret.
pub async fn relay_token(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Form(grant): Form<TokenGrantForm>,
) -> Response {
    let Some(provider) = state.provider(&provider_id) else {
        return oauth_error(StatusCode::NOT_FOUND, "invalid_request", "unknown provider");
    };
    if grant.client_id != provider.client_id {
        return oauth_error(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "client_id does not match the configured provider",
        );
    }

    let mut form: Vec<(&str, &str)> = vec![("client_id", &provider.client_id)];
    match grant.grant_type {
        GrantType::AuthorizationCode => {
            let (Some(code), Some(redirect_uri), Some(code_verifier)) =
                (&grant.code, &grant.redirect_uri, &grant.code_verifier)
            else {
                return oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    "authorization_code grant requires code, redirect_uri and code_verifier",
                );
            };
            form.push(("grant_type", "authorization_code"));
            form.push(("code", code));
            form.push(("redirect_uri", redirect_uri));
            form.push(("code_verifier", code_verifier));
        }
        GrantType::RefreshToken => {
            let Some(refresh_token) = &grant.refresh_token else {
                return oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    "refresh_token grant requires refresh_token",
                );
            };
            form.push(("grant_type", "refresh_token"));
            form.push(("refresh_token", refresh_token));
        }
    }
    if let Some(secret) = &provider.client_secret {
        form.push(("client_secret", secret));
    }

    let upstream = match state
        .http
        .post(&provider.token_endpoint)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(provider = %provider_id, error = %e, "token relay upstream unreachable");
            return oauth_error(
                StatusCode::BAD_GATEWAY,
                "temporarily_unavailable",
                "token endpoint unreachable",
            );
        }
    };

    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = upstream.text().await.unwrap_or_default();

    match Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(provider = %provider_id, error = %e, "failed to build relay response");
            oauth_error(
                StatusCode::BAD_GATEWAY,
                "temporarily_unavailable",
                "failed to relay token response",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use devtrack_auth::{
        AuthConfig, AuthService, MemoryStore, ProviderConfig, SecurityConfig, SystemClock,
    };
    use std::sync::Arc;
    use tower::ServiceExt;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(token_endpoint: &str) -> ProviderConfig {
        ProviderConfig {
            id: "github".into(),
            name: "GitHub".into(),
            authority: "https://github.example".into(),
            client_id: "client-123".into(),
            client_secret: Some("secret-456".into()),
            redirect_uri: "https://app.example/auth/callback/github".into(),
            scope: "user:email".into(),
            response_type: "code".into(),
            authorization_endpoint: "https://github.example/login/oauth/authorize".into(),
            token_endpoint: token_endpoint.into(),
            userinfo_endpoint: "https://github.example/user".into(),
            logo: None,
        }
    }

    fn relay_app(token_endpoint: &str) -> Router {
        let providers = vec![provider(token_endpoint)];
        let auth = Arc::new(
            AuthService::new(
                AuthConfig {
                    providers: providers.clone(),
                    hosted: None,
                    security: SecurityConfig::default(),
                },
                Arc::new(MemoryStore::new()),
                Arc::new(SystemClock),
            )
            .unwrap(),
        );
        Router::new()
            .route("/auth/{provider}/token", post(relay_token))
            .with_state(AppState::new(auth, providers))
    }

    async fn post_form(app: Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn relay_injects_secret_and_pipes_tokens_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=code-1"))
            .and(body_string_contains("code_verifier=ver-1"))
            .and(body_string_contains("client_secret=secret-456"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let app = relay_app(&format!("{}/token", server.uri()));
        let (status, body) = post_form(
            app,
            "/auth/github/token",
            "grant_type=authorization_code&client_id=client-123&code=code-1\
             &redirect_uri=https%3A%2F%2Fapp.example%2Fauth%2Fcallback%2Fgithub&code_verifier=ver-1",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["access_token"], "at-1");
    }

    #[tokio::test]
    async fn mismatched_client_id_is_rejected_before_forwarding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let app = relay_app(&format!("{}/token", server.uri()));
        let (status, body) = post_form(
            app,
            "/auth/github/token",
            "grant_type=refresh_token&client_id=someone-else&refresh_token=rt-1",
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_client");
    }

    #[tokio::test]
    async fn missing_grant_fields_are_rejected() {
        let app = relay_app("https://nowhere.example/token");
        let (status, body) = post_form(
            app,
            "/auth/github/token",
            "grant_type=authorization_code&client_id=client-123&code=code-1",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");
    }

    #[tokio::test]
    async fn unknown_provider_is_not_found() {
        let app = relay_app("https://nowhere.example/token");
        let (status, _) = post_form(
            app,
            "/auth/gitlab/token",
            "grant_type=refresh_token&client_id=client-123&refresh_token=rt-1",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upstream_error_status_is_piped_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let app = relay_app(&format!("{}/token", server.uri()));
        let (status, body) = post_form(
            app,
            "/auth/github/token",
            "grant_type=refresh_token&client_id=client-123&refresh_token=stale",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_grant");
    }
}
