//! Environment-driven configuration.
//! Everything deployment-specific (ports, origins, cookie policy, OAuth
//! endpoints) is read once at startup; handlers only ever see `AppConfig`.

use std::time::Duration;
use tracing::warn;

/// Session lifetime: 24 hours from creation/renewal.
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Placeholder secret shipped in dev environment files. Flagged at startup so
/// it never silently reaches a deployment.
const DEV_SESSION_SECRET: &str = "your-very-long-secret-key-here";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    Development,
    Production,
}

/// `SameSite` policy for the session cookie. `None` is required when the API
/// and front-end live on different origins; `Lax` suits same-site setups.
/// Kept configurable rather than hard-coded because both deployments exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieSameSite {
    None,
    Lax,
}

impl CookieSameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            CookieSameSite::None => "None",
            CookieSameSite::Lax => "Lax",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub mode: DeployMode,
    /// Prefix for all API routes, e.g. "/api".
    pub base_path: String,
    /// SPA origin, used for CORS and the post-login workspace redirect.
    pub frontend_origin: String,
    /// Where the browser lands when the federated flow cannot complete.
    pub frontend_oauth_callback_url: String,
    pub session_secret: String,
    pub cookie_name: String,
    pub cookie_same_site: CookieSameSite,
    pub session_ttl: Duration,
    pub oauth: OAuthSettings,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mode = match env_or("APP_ENV", "development").as_str() {
            "production" => DeployMode::Production,
            _ => DeployMode::Development,
        };
        let cookie_same_site = match env_or("SESSION_SAMESITE", "none").to_ascii_lowercase().as_str() {
            "lax" => CookieSameSite::Lax,
            _ => CookieSameSite::None,
        };
        let session_secret = env_or("SESSION_SECRET", DEV_SESSION_SECRET);
        if session_secret == DEV_SESSION_SECRET {
            warn!("SESSION_SECRET is the development placeholder; set a real secret before deploying");
        }
        let frontend_origin = env_or("FRONTEND_ORIGIN", "http://localhost:5173");
        Self {
            port: env_or("PORT", "8000").parse().unwrap_or(8000),
            mode,
            base_path: env_or("BASE_PATH", "/api"),
            frontend_oauth_callback_url: env_or(
                "FRONTEND_OAUTH_CALLBACK_URL",
                &format!("{}/oauth/callback", frontend_origin),
            ),
            frontend_origin,
            session_secret,
            cookie_name: env_or("SESSION_COOKIE_NAME", "connect.sid"),
            cookie_same_site,
            session_ttl: SESSION_TTL,
            oauth: OAuthSettings {
                client_id: env_or("OAUTH_CLIENT_ID", ""),
                client_secret: env_or("OAUTH_CLIENT_SECRET", ""),
                auth_url: env_or("OAUTH_AUTH_URL", "https://accounts.google.com/o/oauth2/v2/auth"),
                token_url: env_or("OAUTH_TOKEN_URL", "https://oauth2.googleapis.com/token"),
                userinfo_url: env_or(
                    "OAUTH_USERINFO_URL",
                    "https://openidconnect.googleapis.com/v1/userinfo",
                ),
                redirect_uri: env_or("OAUTH_REDIRECT_URI", "http://localhost:8000/api/auth/oauth/callback"),
                scopes: vec!["openid".into(), "email".into(), "profile".into()],
            },
        }
    }

    /// True when the `Secure` cookie attribute should be set.
    pub fn secure_cookies(&self) -> bool {
        self.mode == DeployMode::Production
    }
}

#[cfg(test)]
impl AppConfig {
    /// Fixed config for tests: no env reads, non-secure cookies, "/api" base.
    pub fn for_tests() -> Self {
        Self {
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
}
