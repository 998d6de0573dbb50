//! End-to-end handler tests for the auth and session endpoints, driven
//! through the real router.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use teamsync::config::{AppConfig, CookieSameSite, DeployMode, OAuthSettings, SESSION_TTL};
use teamsync::identity::provider::{ExchangeError, ProviderProfile};
use teamsync::identity::OAuthProvider;
use teamsync::security::UserRecord;
use teamsync::server::{router, AppState};
use teamsync::session::MemorySessionStore;

fn test_config() -> AppConfig {
    AppConfig {
        port: 0,
        mode: DeployMode::Development,
        base_path: "/api".into(),
        frontend_origin: "http://localhost:5173".into(),
        frontend_oauth_callback_url: "http://localhost:5173/oauth/callback".into(),
        session_secret: "test-secret".into(),
        cookie_name: "connect.sid".into(),
        cookie_same_site: CookieSameSite::None,
        session_ttl: SESSION_TTL,
        oauth: OAuthSettings {
            client_id: "client".into(),
            client_secret: "secret".into(),
            auth_url: "https://provider.test/auth".into(),
            token_url: "https://provider.test/token".into(),
            userinfo_url: "https://provider.test/userinfo".into(),
            redirect_uri: "http://localhost:8000/api/auth/oauth/callback".into(),
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
        },
    }
}

struct MockProvider {
    profile: Option<ProviderProfile>,
}

#[async_trait]
impl OAuthProvider for MockProvider {
    fn authorize_url(&self) -> String {
        "https://provider.test/auth?client_id=client".into()
    }
    async fn exchange(&self, _code: &str) -> Result<ProviderProfile, ExchangeError> {
        match &self.profile {
            Some(p) => Ok(p.clone()),
            None => Err(ExchangeError::Status { status: 502, body: "upstream".into() }),
        }
    }
}

fn app_with_provider(profile: Option<ProviderProfile>) -> (AppState, Router) {
    let state = AppState::new(
        test_config(),
        Arc::new(MemorySessionStore::new(SESSION_TTL)),
        Arc::new(MockProvider { profile }),
    );
    let app = router(state.clone());
    (state, app)
}

fn app() -> (AppState, Router) {
    app_with_provider(None)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

fn with_cookie(mut req: Request<Body>, cookie: &str) -> Request<Body> {
    req.headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    req
}

/// First `name=value` pair of a Set-Cookie header, for echoing back.
fn cookie_pair(headers: &axum::http::HeaderMap) -> String {
    headers
        .get(header::SET_COOKIE)
        .expect("set-cookie present")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

async fn register_u1(app: &Router) {
    let (status, _, _) = send(
        app,
        post_json(
            "/api/auth/register",
            json!({"name": "U One", "email": "u1@example.com", "password": "p1secret"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn health_endpoint_is_open() {
    let (_, app) = app();
    let (status, _, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn register_login_logout_roundtrip() {
    let (_, app) = app();
    register_u1(&app).await;

    let (status, headers, body) = send(
        &app,
        post_json(
            "/api/auth/login",
            json!({"email": "u1@example.com", "password": "p1secret"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logged in successfully");
    assert_eq!(body["user"]["email"], "u1@example.com");
    let cookie = cookie_pair(&headers);

    let (status, _, body) = send(&app, with_cookie(get("/api/user/current"), &cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "u1@example.com");

    let (status, headers, body) =
        send(&app, with_cookie(post_json("/api/auth/logout", json!({})), &cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logged out successfully");
    let cleared = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cleared.contains("Max-Age=0"));

    // The destroyed session no longer admits.
    let (status, _, body) = send(&app, with_cookie(get("/api/user/current"), &cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "no_session");
}

#[tokio::test]
async fn invalid_credentials_are_generic() {
    let (_, app) = app();
    register_u1(&app).await;

    let (status, headers, body) = send(
        &app,
        post_json(
            "/api/auth/login",
            json!({"email": "u1@example.com", "password": "wrong"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid email or password");
    assert!(headers.get(header::SET_COOKIE).is_none());

    // Unknown identifier yields exactly the same rejection.
    let (status, _, body) = send(
        &app,
        post_json(
            "/api/auth/login",
            json!({"email": "nobody@example.com", "password": "p1secret"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid email or password");
}

#[tokio::test]
async fn login_rotates_the_session_id() {
    let (_, app) = app();
    register_u1(&app).await;

    let creds = json!({"email": "u1@example.com", "password": "p1secret"});
    let (_, headers, _) = send(&app, post_json("/api/auth/login", creds.clone())).await;
    let first = cookie_pair(&headers);

    // Logging in again while presenting the first session's cookie must
    // produce a different session id (fixation defense).
    let (_, headers, _) =
        send(&app, with_cookie(post_json("/api/auth/login", creds), &first)).await;
    let second = cookie_pair(&headers);
    assert_ne!(first, second);
}

#[tokio::test]
async fn register_rejects_bad_input_and_duplicates() {
    let (_, app) = app();
    let (status, _, _) = send(
        &app,
        post_json(
            "/api/auth/register",
            json!({"name": "", "email": "u1@example.com", "password": "p1secret"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    register_u1(&app).await;
    let (status, _, _) = send(
        &app,
        post_json(
            "/api/auth/register",
            json!({"name": "U One", "email": "u1@example.com", "password": "p1secret"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn gate_rejects_missing_and_forged_cookies() {
    let (_, app) = app();
    let (status, _, body) = send(&app, get("/api/user/current")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "no_session");

    // A cookie with a bad signature is treated as no cookie at all.
    let (status, _, body) = send(
        &app,
        with_cookie(get("/api/user/current"), "connect.sid=forged.c2lnbmF0dXJl"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "no_session");
}

#[tokio::test]
async fn logout_without_session_still_clears_cookie() {
    let (_, app) = app();
    let (status, headers, _) = send(&app, post_json("/api/auth/logout", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .contains("Max-Age=0"));
}

#[tokio::test]
async fn oauth_callback_success_redirects_to_workspace() {
    let (_, app) = app_with_provider(Some(ProviderProfile {
        subject: "sub-1".into(),
        email: "fed@example.com".into(),
        name: "Fed".into(),
    }));
    let (status, headers, _) = send(&app, get("/api/auth/oauth/callback?code=abc")).await;
    assert!(status.is_redirection());
    let location = headers.get(header::LOCATION).unwrap().to_str().unwrap();
    assert!(location.starts_with("http://localhost:5173/workspace/"));
    assert!(headers.get(header::SET_COOKIE).is_some());
}

#[tokio::test]
async fn oauth_callback_without_workspace_redirects_to_failure() {
    let profile = ProviderProfile {
        subject: "sub-9".into(),
        email: "bare@example.com".into(),
        name: "Bare".into(),
    };
    let (state, app) = app_with_provider(Some(profile));
    // Pre-provision the account without a workspace so the resolver has no
    // redirect context.
    state.users.insert(UserRecord {
        id: "user-9".into(),
        email: "bare@example.com".into(),
        name: "Bare".into(),
        password_hash: None,
        provider_subject: Some("sub-9".into()),
        current_workspace: None,
        created_at: chrono::Utc::now(),
    });
    let (status, headers, _) = send(&app, get("/api/auth/oauth/callback?code=abc")).await;
    assert!(status.is_redirection());
    assert_eq!(
        headers.get(header::LOCATION).unwrap().to_str().unwrap(),
        "http://localhost:5173/oauth/callback?status=failure"
    );
}

#[tokio::test]
async fn oauth_callback_cancellation_and_provider_errors_redirect_to_failure() {
    let (_, app) = app();
    for uri in [
        "/api/auth/oauth/callback?error=access_denied",
        "/api/auth/oauth/callback?error=temporarily_unavailable",
        "/api/auth/oauth/callback?code=abc", // exchange fails upstream
        "/api/auth/oauth/callback",          // no code at all
    ] {
        let (status, headers, _) = send(&app, get(uri)).await;
        assert!(status.is_redirection(), "{uri} should redirect");
        assert_eq!(
            headers.get(header::LOCATION).unwrap().to_str().unwrap(),
            "http://localhost:5173/oauth/callback?status=failure",
            "{uri}"
        );
    }
}

#[tokio::test]
async fn oauth_authorize_hands_off_to_provider() {
    let (_, app) = app();
    let (status, headers, _) = send(&app, get("/api/auth/oauth/authorize")).await;
    assert!(status.is_redirection());
    assert!(headers
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("https://provider.test/auth"));
}
