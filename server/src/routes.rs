use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use devtrack_auth::{AuthError, CallbackParams, Credentials, SignInOutcome, UserSession};
use serde::{Deserialize, Serialize};

use crate::relay;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/{provider}/login", get(login))
        .route("/auth/{provider}/token", post(relay::relay_token))
        .route("/auth/callback/{provider}", get(callback))
        .route("/auth/email/login", post(email_login))
        .route("/auth/logout", post(logout))
        .route("/api/auth/status", get(auth_status))
        .route("/api/auth/providers", get(providers))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Serialize)]
struct AuthStatusResponse {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserInfo>,
}

#[derive(Serialize)]
struct UserInfo {
    id: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar: Option<String>,
    provider: String,
}

impl From<&UserSession> for UserInfo {
    fn from(session: &UserSession) -> Self {
        Self {
            id: session.id.clone(),
            name: session.name.clone(),
            email: session.email.clone(),
            avatar: session.avatar.clone(),
            provider: session.provider.clone(),
        }
    }
}

#[derive(Deserialize)]
pub struct EmailLoginForm {
    email: String,
    password: String,
}

fn status_for(error: &AuthError) -> StatusCode {
    match error {
        AuthError::UnknownProvider(_) => StatusCode::NOT_FOUND,
        AuthError::Authorization(_)
        | AuthError::StateMismatch
        | AuthError::TokenExchange(_)
        | AuthError::Refresh(_)
        | AuthError::SessionExpired
        | AuthError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        AuthError::MalformedCallback | AuthError::Config(_) => StatusCode::BAD_REQUEST,
        AuthError::Network(_) | AuthError::UserInfo(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: AuthError) -> Response {
    (
        status_for(&error),
        Json(ErrorResponse {
            message: error.to_string(),
        }),
    )
        .into_response()
}

async fn health() -> &'static str {
    "ok"
}

/// `GET /auth/{provider}/login`: start an authorization flow and redirect
/// the browser to the provider
async fn login(State(state): State<AppState>, Path(provider): Path<String>) -> Response {
    match state.auth.sign_in(&provider, Credentials::None).await {
        Ok(SignInOutcome::Redirect(url)) => Redirect::to(url.as_str()).into_response(),
        // Password providers don't use the redirect route
        Ok(SignInOutcome::SignedIn(_)) => StatusCode::BAD_REQUEST.into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /auth/callback/{provider}`: complete the flow and bounce the
/// browser back into the app
///
/// Failures redirect to the login screen with the reason in the query
/// string rather than rendering an error page here.
async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    match state.auth.handle_callback(&provider, &params).await {
        Ok(session) => {
            tracing::info!(provider = %provider, user = %session.id, "callback sign-in complete");
            Redirect::to("/")
        }
        Err(e) => {
            let query: String = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("error", &e.to_string())
                .finish();
            Redirect::to(&format!("/login?{query}"))
        }
    }
}

/// `POST /auth/email/login`: hosted email/password sign-in
async fn email_login(State(state): State<AppState>, Form(form): Form<EmailLoginForm>) -> Response {
    let credentials = Credentials::Password {
        email: &form.email,
        password: &form.password,
    };
    match state.auth.sign_in("email", credentials).await {
        Ok(SignInOutcome::SignedIn(session)) => Json(UserInfo::from(&session)).into_response(),
        Ok(SignInOutcome::Redirect(_)) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Err(e) => error_response(e),
    }
}

async fn logout(State(state): State<AppState>) -> StatusCode {
    state.auth.sign_out().await;
    StatusCode::NO_CONTENT
}

async fn auth_status(State(state): State<AppState>) -> Json<AuthStatusResponse> {
    if state.auth.is_authenticated().await {
        let user = state.auth.current_user().await;
        return Json(AuthStatusResponse {
            authenticated: user.is_some(),
            user: user.as_ref().map(UserInfo::from),
        });
    }
    Json(AuthStatusResponse {
        authenticated: false,
        user: None,
    })
}

async fn providers(State(state): State<AppState>) -> Json<Vec<devtrack_auth::ProviderDescriptor>> {
    Json(state.auth.available_providers())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use devtrack_auth::{AuthConfig, AuthService, HostedConfig, MemoryStore, ProviderConfig, SecurityConfig, SystemClock};
    use std::sync::Arc;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app(base: &str) -> Router {
        let providers = vec![ProviderConfig {
            id: "github".into(),
            name: "GitHub".into(),
            authority: base.into(),
            client_id: "client-123".into(),
            client_secret: Some("secret-456".into()),
            redirect_uri: "https://app.example/auth/callback/github".into(),
            scope: "user:email".into(),
            response_type: "code".into(),
            authorization_endpoint: format!("{base}/login/oauth/authorize"),
            token_endpoint: format!("{base}/login/oauth/access_token"),
            userinfo_endpoint: format!("{base}/user"),
            logo: None,
        }];
        let auth = Arc::new(
            AuthService::new(
                AuthConfig {
                    providers: providers.clone(),
                    hosted: Some(HostedConfig {
                        base_url: base.into(),
                        anon_key: "anon-key".into(),
                    }),
                    security: SecurityConfig::default(),
                },
                Arc::new(MemoryStore::new()),
                Arc::new(SystemClock),
            )
            .unwrap(),
        );
        router(AppState::new(auth, providers))
    }

    async fn get_location(app: &Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        (status, location)
    }

    async fn get_json(app: &Router, uri: &str) -> serde_json::Value {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn state_param(location: &str) -> String {
        let url = url::Url::parse(location).unwrap();
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    async fn mount_provider(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "expires_in": 3600
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 42, "login": "octocat", "name": "Octo Cat"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn login_redirects_to_provider() {
        let server = MockServer::start().await;
        let app = app(&server.uri());

        let (status, location) = get_location(&app, "/auth/github/login").await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert!(location.starts_with(&format!("{}/login/oauth/authorize", server.uri())));
        assert!(location.contains("code_challenge_method=S256"));
    }

    #[tokio::test]
    async fn login_with_unknown_provider_is_not_found() {
        let server = MockServer::start().await;
        let app = app(&server.uri());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/gitlab/login")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn callback_signs_in_and_redirects_home() {
        let server = MockServer::start().await;
        mount_provider(&server).await;
        let app = app(&server.uri());

        let (_, location) = get_location(&app, "/auth/github/login").await;
        let state = state_param(&location);

        let (status, location) = get_location(
            &app,
            &format!("/auth/callback/github?code=code-1&state={state}"),
        )
        .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(location, "/");

        let status_body = get_json(&app, "/api/auth/status").await;
        assert_eq!(status_body["authenticated"], true);
        assert_eq!(status_body["user"]["id"], "42");
        assert_eq!(status_body["user"]["provider"], "github");
    }

    #[tokio::test]
    async fn failed_callback_redirects_to_login_with_reason() {
        let server = MockServer::start().await;
        let app = app(&server.uri());

        let (_, location) = get_location(&app, "/auth/github/login").await;
        let _ = state_param(&location);

        let (status, location) =
            get_location(&app, "/auth/callback/github?code=code-1&state=tampered").await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert!(location.starts_with("/login?error="));
    }

    #[tokio::test]
    async fn email_login_and_logout_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "hat-1",
                "user": { "id": "u-1", "email": "ada@example.com" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        let app = app(&server.uri());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/email/login")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("email=ada%40example.com&password=pw"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let status_body = get_json(&app, "/api/auth/status").await;
        assert_eq!(status_body["authenticated"], true);
        assert_eq!(status_body["user"]["provider"], "email");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/logout")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let status_body = get_json(&app, "/api/auth/status").await;
        assert_eq!(status_body["authenticated"], false);
    }

    #[tokio::test]
    async fn providers_endpoint_lists_configured_sources() {
        let server = MockServer::start().await;
        let app = app(&server.uri());

        let body = get_json(&app, "/api/auth/providers").await;
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["github", "email"]);
    }
}
