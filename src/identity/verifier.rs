//! Identity verification strategies. Both return a tagged result and never
//! touch session state; establishing the session is the lifecycle manager's
//! job, which keeps the two steps separately testable.

use std::sync::Arc;
use tracing::debug;

use super::principal::Principal;
use super::provider::OAuthProvider;
use crate::security::{self, UserDirectory};

/// Outcome of a verification attempt. This crosses the component boundary as
/// a value; failures are variants, not errors.
#[derive(Debug, Clone)]
pub enum VerificationResult {
    Success(Principal),
    InvalidCredentials,
    ProviderError(String),
    Cancelled,
}

/// Password strategy against the user directory.
pub struct LocalVerifier {
    users: Arc<UserDirectory>,
    /// Verified against when the email is unknown or has no password, so the
    /// miss path costs the same as a real comparison.
    dummy_hash: String,
}

impl LocalVerifier {
    pub fn new(users: Arc<UserDirectory>) -> Self {
        let dummy_hash = security::hash_password("unused-dummy-credential")
            .unwrap_or_default();
        Self { users, dummy_hash }
    }

    /// Unknown email and wrong password both come back as
    /// `InvalidCredentials`; the result never says which.
    pub fn verify(&self, email: &str, password: &str) -> VerificationResult {
        match self.users.find_by_email(email) {
            Some(user) => match user.password_hash.as_deref() {
                Some(hash) if security::verify_password(hash, password) => {
                    VerificationResult::Success(user.principal())
                }
                Some(_) => VerificationResult::InvalidCredentials,
                // Federated-only account: no password to match.
                None => {
                    let _ = security::verify_password(&self.dummy_hash, password);
                    VerificationResult::InvalidCredentials
                }
            },
            None => {
                let _ = security::verify_password(&self.dummy_hash, password);
                VerificationResult::InvalidCredentials
            }
        }
    }
}

/// Federated strategy: exchange the callback artifacts through the provider
/// collaborator and map the profile onto a directory record.
pub struct FederatedVerifier {
    provider: Arc<dyn OAuthProvider>,
    users: Arc<UserDirectory>,
}

impl FederatedVerifier {
    pub fn new(provider: Arc<dyn OAuthProvider>, users: Arc<UserDirectory>) -> Self {
        Self { provider, users }
    }

    pub fn authorize_url(&self) -> String {
        self.provider.authorize_url()
    }

    /// `code` and `error` are the raw callback query parameters.
    pub async fn verify(&self, code: Option<&str>, error: Option<&str>) -> VerificationResult {
        match error {
            Some("access_denied") => return VerificationResult::Cancelled,
            Some(other) => return VerificationResult::ProviderError(other.to_string()),
            None => {}
        }
        let Some(code) = code else {
            return VerificationResult::ProviderError("missing authorization code".into());
        };
        match self.provider.exchange(code).await {
            Ok(profile) => {
                let user = self.users.find_or_create_federated(&profile);
                debug!(user = %user.id, "federated profile resolved");
                VerificationResult::Success(user.principal())
            }
            Err(e) => VerificationResult::ProviderError(e.to_string()),
        }
    }
}
