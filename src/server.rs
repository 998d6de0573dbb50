//!
//! teamsync HTTP server
//! --------------------
//! Axum-based HTTP API for the auth and session-lifecycle core.
//!
//! Responsibilities:
//! - Signed session cookie issue/parse (HMAC over the session id).
//! - Register/login/logout endpoints backed by the `identity` and `session`
//!   modules, plus the federated authorize/callback pair.
//! - The access gate, applied as a middleware layer on every protected route
//!   group; admitted requests carry the principal in their extensions.
//! - Outcome resolution: JSON payloads for the API flows, browser redirects
//!   for the federated flow.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::identity::{
    FederatedVerifier, HttpOAuthProvider, LocalVerifier, OAuthProvider, Principal,
    VerificationResult,
};
use crate::security::UserDirectory;
use crate::session::{
    AccessDecision, AccessGate, MemorySessionStore, SessionManager, SessionStore, StoreAdapter,
};

type HmacSha256 = Hmac<Sha256>;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<UserDirectory>,
    pub sessions: Arc<StoreAdapter>,
    pub lifecycle: Arc<SessionManager>,
    pub gate: Arc<AccessGate>,
    pub local: Arc<LocalVerifier>,
    pub federated: Arc<FederatedVerifier>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn OAuthProvider>,
    ) -> Self {
        let config = Arc::new(config);
        let users = Arc::new(UserDirectory::new());
        let sessions = Arc::new(StoreAdapter::attach(store));
        let lifecycle = Arc::new(SessionManager::new(sessions.clone()));
        let gate = Arc::new(AccessGate::new(sessions.clone(), users.clone()));
        let local = Arc::new(LocalVerifier::new(users.clone()));
        let federated = Arc::new(FederatedVerifier::new(provider, users.clone()));
        Self { config, users, sessions, lifecycle, gate, local, federated }
    }
}

/// Mount all routes. Auth endpoints are open; everything else sits behind the
/// access gate layer.
pub fn router(state: AppState) -> Router {
    let auth = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/oauth/authorize", get(oauth_authorize))
        .route("/auth/oauth/callback", get(oauth_callback));

    let protected = Router::new()
        .route("/user/current", get(current_user))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(health))
        .nest(&state.config.base_path, auth.merge(protected))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origin = config
        .frontend_origin
        .parse::<HeaderValue>()
        .unwrap_or_else(|_| HeaderValue::from_static("http://localhost:5173"));
    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
}

/// Start the HTTP server: build state over the in-memory session store and
/// the HTTP OAuth provider, spawn the expiry sweeper, serve.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let store = Arc::new(MemorySessionStore::new(config.session_ttl));
    let provider = Arc::new(HttpOAuthProvider::new(config.oauth.clone()));
    let port = config.port;
    let state = AppState::new(config, store.clone(), provider);

    // Background session sweeper. Expired sessions are already invisible to
    // the gate; this just reclaims memory.
    tokio::spawn(async move {
        loop {
            let removed = store.sweep_expired();
            if removed > 0 {
                tracing::debug!(removed = removed, "session_sweep");
            }
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        }
    });

    let app = router(state);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ---- session cookie ----
//
// Cookie value is `sid.sig` where sig = base64url(HMAC-SHA256(secret, sid)).
// A missing or bad signature is treated as no cookie at all.

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie").or_else(|| headers.get("Cookie"))?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name {
                return Some(v[1..].to_string());
            }
        }
    }
    None
}

fn sign_sid(secret: &str, sid: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(sid.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

pub(crate) fn encode_cookie_value(secret: &str, sid: &str) -> String {
    format!("{}.{}", sid, sign_sid(secret, sid))
}

pub(crate) fn decode_cookie_value(secret: &str, value: &str) -> Option<String> {
    let (sid, sig) = value.rsplit_once('.')?;
    let sig_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(sig).ok()?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(sid.as_bytes());
    // verify_slice compares in constant time.
    mac.verify_slice(&sig_bytes).ok()?;
    Some(sid.to_string())
}

/// Session id carried by the request, if a cookie with a valid signature is
/// present.
fn session_sid(headers: &HeaderMap, config: &AppConfig) -> Option<String> {
    let raw = parse_cookie(headers, &config.cookie_name)?;
    decode_cookie_value(&config.session_secret, &raw)
}

fn cookie_attributes(config: &AppConfig) -> String {
    let secure = if config.secure_cookies() { "Secure; " } else { "" };
    format!(
        "HttpOnly; {}SameSite={}; Path=/",
        secure,
        config.cookie_same_site.as_str()
    )
}

fn set_session_cookie(config: &AppConfig, sid: &str) -> HeaderValue {
    let value = encode_cookie_value(&config.session_secret, sid);
    let max_age = config.session_ttl.as_secs();
    HeaderValue::from_str(&format!(
        "{}={}; Max-Age={}; {}",
        config.cookie_name,
        value,
        max_age,
        cookie_attributes(config)
    ))
    .expect("cookie header is ascii")
}

fn clear_session_cookie(config: &AppConfig) -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0; {}",
        config.cookie_name,
        cookie_attributes(config)
    ))
    .expect("cookie header is ascii")
}

// ---- access gate middleware ----

/// Prefix guard for protected route groups. Rejections answer 401 with a
/// machine-readable reason before any downstream handler runs; admissions
/// thread the principal through request extensions (no process-wide
/// current-user state).
async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let sid = session_sid(req.headers(), &state.config);
    match state.gate.decide(sid.as_deref()) {
        Ok(AccessDecision::Admit(principal)) => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Ok(AccessDecision::Reject(reason)) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"status": "unauthorized", "code": reason.code()})),
        )
            .into_response(),
        Err(e) => {
            error!("access gate store failure: {e}");
            AppError::from(e).into_response()
        }
    }
}

// ---- handlers ----

async fn health() -> impl IntoResponse {
    Json(json!({
        "message": "Team Sync API is running!",
        "status": "healthy",
    }))
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    name: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    error: Option<String>,
}

fn validate_register(payload: &RegisterPayload) -> Result<(), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::validation("name_required", "Name is required"));
    }
    if !payload.email.contains('@') {
        return Err(AppError::validation("email_invalid", "A valid email is required"));
    }
    if payload.password.len() < 6 {
        return Err(AppError::validation(
            "password_too_short",
            "Password must be at least 6 characters",
        ));
    }
    Ok(())
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<impl IntoResponse, AppError> {
    validate_register(&payload)?;
    state
        .users
        .create_local(payload.email.trim(), payload.name.trim(), &payload.password)
        .map_err(|_| AppError::conflict("email_exists", "Email is already registered"))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"message": "User created successfully"})),
    ))
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginPayload>,
) -> Response {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return AppError::validation("credentials_required", "Email and password are required")
            .into_response();
    }
    match state.local.verify(payload.email.trim(), &payload.password) {
        VerificationResult::Success(principal) => {
            let current = session_sid(&headers, &state.config);
            match state.lifecycle.login(current.as_deref(), &principal) {
                Ok(session) => {
                    let mut response_headers = HeaderMap::new();
                    response_headers
                        .insert(header::SET_COOKIE, set_session_cookie(&state.config, &session.id));
                    (
                        StatusCode::OK,
                        response_headers,
                        Json(json!({
                            "message": "Logged in successfully",
                            "user": principal,
                        })),
                    )
                        .into_response()
                }
                Err(e) => {
                    error!("login session establishment failed: {e}");
                    AppError::from(e).into_response()
                }
            }
        }
        // One generic rejection for both unknown email and wrong password.
        VerificationResult::InvalidCredentials => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Invalid email or password"})),
        )
            .into_response(),
        // The local strategy never produces provider outcomes.
        VerificationResult::ProviderError(_) | VerificationResult::Cancelled => {
            AppError::internal("verifier_mismatch", "unexpected verification outcome")
                .into_response()
        }
    }
}

/// Logout runs strictly ordered: the request-scoped identity binding dies
/// with this request, the persisted record is destroyed, and only then is
/// the client told to drop the cookie. A destroy failure stops the sequence;
/// the client never sees success for a session that still exists.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(sid) = session_sid(&headers, &state.config) {
        if let Err(e) = state.lifecycle.logout(&sid) {
            error!("session destroy failed: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to destroy session"})),
            )
                .into_response();
        }
    }
    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::SET_COOKIE, clear_session_cookie(&state.config));
    (
        StatusCode::OK,
        response_headers,
        Json(json!({"message": "Logged out successfully"})),
    )
        .into_response()
}

async fn oauth_authorize(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(&state.federated.authorize_url())
}

fn failure_redirect(config: &AppConfig) -> Response {
    Redirect::temporary(&format!("{}?status=failure", config.frontend_oauth_callback_url))
        .into_response()
}

/// Browser-facing resolver for the federated flow: workspace redirect on a
/// fully established session, failure redirect for everything the provider
/// side got wrong. Only a store failure surfaces as a 500.
async fn oauth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let result = state
        .federated
        .verify(query.code.as_deref(), query.error.as_deref())
        .await;
    match result {
        VerificationResult::Success(principal) => {
            let current = session_sid(&headers, &state.config);
            let session = match state.lifecycle.login(current.as_deref(), &principal) {
                Ok(s) => s,
                Err(e) => {
                    error!("oauth login session establishment failed: {e}");
                    return AppError::from(e).into_response();
                }
            };
            let Some(workspace) = principal.current_workspace.as_deref() else {
                warn!(user = %principal.id, "federated login without a resolvable workspace");
                return failure_redirect(&state.config);
            };
            let url = format!(
                "{}/workspace/{}",
                state.config.frontend_origin,
                urlencoding::encode(workspace)
            );
            let mut response = Redirect::temporary(&url).into_response();
            response
                .headers_mut()
                .insert(header::SET_COOKIE, set_session_cookie(&state.config, &session.id));
            response
        }
        VerificationResult::Cancelled => {
            info!("federated login cancelled by user");
            failure_redirect(&state.config)
        }
        VerificationResult::ProviderError(msg) => {
            warn!("federated login provider error: {msg}");
            failure_redirect(&state.config)
        }
        VerificationResult::InvalidCredentials => failure_redirect(&state.config),
    }
}

async fn current_user(Extension(principal): Extension<Principal>) -> impl IntoResponse {
    Json(json!({
        "message": "User fetched successfully",
        "user": principal,
    }))
}
