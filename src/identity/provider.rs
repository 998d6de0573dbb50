//! Federated provider collaborator: authorization hand-off URL plus the
//! code-for-profile exchange. The HTTP implementation speaks the standard
//! authorization-code shape (token endpoint, then userinfo); tests swap in
//! their own `OAuthProvider`.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::OAuthSettings;

/// Profile returned by the provider's userinfo endpoint, reduced to the
/// fields the user directory cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderProfile {
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider response missing {0}")]
    Malformed(&'static str),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        ExchangeError::Transport(err.to_string())
    }
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Where to send the browser to start the consent flow.
    fn authorize_url(&self) -> String;
    /// Trade the callback's authorization code for the user's profile.
    async fn exchange(&self, code: &str) -> Result<ProviderProfile, ExchangeError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct HttpOAuthProvider {
    http: reqwest::Client,
    settings: OAuthSettings,
}

impl HttpOAuthProvider {
    pub fn new(settings: OAuthSettings) -> Self {
        Self { http: reqwest::Client::new(), settings }
    }
}

#[async_trait]
impl OAuthProvider for HttpOAuthProvider {
    fn authorize_url(&self) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}",
            self.settings.auth_url,
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(&self.settings.redirect_uri),
            urlencoding::encode(&self.settings.scopes.join(" ")),
        )
    }

    async fn exchange(&self, code: &str) -> Result<ProviderProfile, ExchangeError> {
        let response = self
            .http
            .post(&self.settings.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Status { status, body });
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|_| ExchangeError::Malformed("access_token"))?;

        let response = self
            .http
            .get(&self.settings.userinfo_url)
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Status { status, body });
        }
        response
            .json::<ProviderProfile>()
            .await
            .map_err(|_| ExchangeError::Malformed("userinfo profile"))
    }
}
