//! User records and credential verification.
//!
//! The directory is the external identity collaborator seen from the auth
//! core: registration writes a record with an Argon2 PHC hash, the local
//! verifier reads it back, and the federated flow provisions a record on
//! first login. Storage is an in-memory map guarded by `parking_lot`;
//! swapping in a database-backed directory only touches this module.

use anyhow::{anyhow, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use std::collections::HashMap;

use crate::identity::provider::ProviderProfile;
use crate::identity::Principal;

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!(e.to_string()))?
        .to_string();
    Ok(phc)
}

/// Argon2's verifier compares digests in constant time; a parse failure of
/// the stored PHC string simply fails verification.
pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub name: String,
    /// Absent for accounts that only ever logged in through a provider.
    pub password_hash: Option<String>,
    /// Provider subject for federated accounts, used to match on re-login.
    pub provider_subject: Option<String>,
    pub current_workspace: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            current_workspace: self.current_workspace.clone(),
        }
    }
}

#[derive(Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local account. Email is the login identifier and must be
    /// unique; every new account gets a default workspace, mirroring the
    /// first-login provisioning of the resource layer.
    pub fn create_local(&self, email: &str, name: &str, password: &str) -> Result<UserRecord> {
        let hash = hash_password(password)?;
        let mut users = self.users.write();
        if users.values().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(anyhow!("email already registered"));
        }
        let rec = UserRecord {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            name: name.to_string(),
            password_hash: Some(hash),
            provider_subject: None,
            current_workspace: Some(uuid::Uuid::new_v4().to_string()),
            created_at: Utc::now(),
        };
        users.insert(rec.id.clone(), rec.clone());
        Ok(rec)
    }

    pub fn find_by_email(&self, email: &str) -> Option<UserRecord> {
        self.users
            .read()
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    pub fn find_by_id(&self, id: &str) -> Option<UserRecord> {
        self.users.read().get(id).cloned()
    }

    /// Match a federated profile to an existing record by provider subject,
    /// falling back to email, creating the account on first login.
    pub fn find_or_create_federated(&self, profile: &ProviderProfile) -> UserRecord {
        let mut users = self.users.write();
        if let Some(existing) = users
            .values()
            .find(|u| u.provider_subject.as_deref() == Some(profile.subject.as_str()))
            .cloned()
        {
            return existing;
        }
        if let Some(existing) = users
            .values_mut()
            .find(|u| !profile.email.is_empty() && u.email.eq_ignore_ascii_case(&profile.email))
        {
            // Link the provider to a pre-existing local account.
            existing.provider_subject = Some(profile.subject.clone());
            return existing.clone();
        }
        let rec = UserRecord {
            id: uuid::Uuid::new_v4().to_string(),
            email: profile.email.clone(),
            name: profile.name.clone(),
            password_hash: None,
            provider_subject: Some(profile.subject.clone()),
            current_workspace: Some(uuid::Uuid::new_v4().to_string()),
            created_at: Utc::now(),
        };
        users.insert(rec.id.clone(), rec.clone());
        rec
    }

    /// Direct insert, used by provisioning paths that build the record
    /// themselves (and by tests that need unusual shapes).
    pub fn insert(&self, rec: UserRecord) {
        self.users.write().insert(rec.id.clone(), rec);
    }
}
