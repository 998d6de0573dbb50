//! Identity verification for unified login: who the caller is, decided by a
//! password check or a federated exchange. Keep the public surface thin and
//! split implementation across sub-modules.

mod principal;
pub mod provider;
mod verifier;

pub use principal::Principal;
pub use provider::{HttpOAuthProvider, OAuthProvider};
pub use verifier::{FederatedVerifier, LocalVerifier, VerificationResult};
