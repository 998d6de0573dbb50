//! Ordered session transitions: establish on login, tear down on logout.
//!
//! The manager owns the sequencing invariants; it never decides *whether* a
//! caller is who they claim to be (that is the verifier's job) and never
//! renders a response (that is the resolver's job).

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::store::{Session, StoreAdapter, StoreError};
use crate::identity::Principal;

pub struct SessionManager {
    store: Arc<StoreAdapter>,
}

impl SessionManager {
    pub fn new(store: Arc<StoreAdapter>) -> Self {
        Self { store }
    }

    /// Promote to authenticated, with the fixation defense first:
    ///
    /// 1. resolve the caller's current session, or create one;
    /// 2. regenerate the session id;
    /// 3. attach the identity and save.
    ///
    /// If regenerate fails, no identity is ever attached. If save fails, the
    /// store holds an anonymous session under the new id and the caller must
    /// retry; there is no observable partially-authenticated state.
    pub fn login(&self, current_sid: Option<&str>, principal: &Principal) -> Result<Session, StoreError> {
        let now = Utc::now();
        let existing = match current_sid {
            Some(sid) => self.store.load(sid)?.filter(|s| !s.is_expired(now)),
            None => None,
        };
        let base = match existing {
            Some(s) => s,
            None => self.store.create()?,
        };
        let mut fresh = self.store.regenerate(&base)?;
        fresh.identity = Some(principal.id.clone());
        fresh.last_touched_at = Utc::now();
        self.store.save(&fresh)?;
        info!(user = %principal.id, sid = %fresh.id, "session established");
        Ok(fresh)
    }

    /// Destroy the persisted session record. The caller sequences this after
    /// dropping its own identity binding and clears the cookie only on
    /// success; a failure here must never read as a completed logout.
    /// Destroying an unknown id succeeds, so repeated logouts are harmless.
    pub fn logout(&self, sid: &str) -> Result<(), StoreError> {
        self.store.destroy(sid)?;
        info!(sid = %sid, "session destroyed");
        Ok(())
    }
}
