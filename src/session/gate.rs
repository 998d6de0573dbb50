//! Per-request trust decision. Read-only over the store: the gate never
//! regenerates, saves, or destroys.

use chrono::Utc;
use std::sync::Arc;

use super::store::{StoreAdapter, StoreError};
use crate::identity::Principal;
use crate::security::UserDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoSession,
    SessionExpired,
    NoIdentity,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::NoSession => "no_session",
            RejectReason::SessionExpired => "session_expired",
            RejectReason::NoIdentity => "no_identity",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccessDecision {
    Admit(Principal),
    Reject(RejectReason),
}

pub struct AccessGate {
    sessions: Arc<StoreAdapter>,
    users: Arc<UserDirectory>,
}

impl AccessGate {
    pub fn new(sessions: Arc<StoreAdapter>, users: Arc<UserDirectory>) -> Self {
        Self { sessions, users }
    }

    /// Decide for a request carrying `sid` (already cookie-decoded, `None`
    /// when no valid cookie was presented). Store failures propagate; they
    /// are a 500, not a silent rejection.
    pub fn decide(&self, sid: Option<&str>) -> Result<AccessDecision, StoreError> {
        let Some(sid) = sid else {
            return Ok(AccessDecision::Reject(RejectReason::NoSession));
        };
        let Some(session) = self.sessions.load(sid)? else {
            return Ok(AccessDecision::Reject(RejectReason::NoSession));
        };
        if session.is_expired(Utc::now()) {
            return Ok(AccessDecision::Reject(RejectReason::SessionExpired));
        }
        let Some(user_id) = session.identity.as_deref() else {
            return Ok(AccessDecision::Reject(RejectReason::NoIdentity));
        };
        match self.users.find_by_id(user_id) {
            Some(user) => Ok(AccessDecision::Admit(user.principal())),
            // Identity points at a user the directory no longer knows.
            None => Ok(AccessDecision::Reject(RejectReason::NoIdentity)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::MemorySessionStore;
    use crate::session::SessionManager;
    use std::time::Duration;

    fn setup() -> (Arc<StoreAdapter>, Arc<UserDirectory>, AccessGate, SessionManager) {
        let adapter = Arc::new(StoreAdapter::attach(Arc::new(MemorySessionStore::new(
            Duration::from_secs(3600),
        ))));
        let users = Arc::new(UserDirectory::new());
        let gate = AccessGate::new(adapter.clone(), users.clone());
        let mgr = SessionManager::new(adapter.clone());
        (adapter, users, gate, mgr)
    }

    #[test]
    fn no_cookie_rejects_with_no_session() {
        let (_, _, gate, _) = setup();
        assert_eq!(
            gate.decide(None).unwrap(),
            AccessDecision::Reject(RejectReason::NoSession)
        );
    }

    #[test]
    fn unknown_sid_rejects_with_no_session() {
        let (_, _, gate, _) = setup();
        assert_eq!(
            gate.decide(Some("nope")).unwrap(),
            AccessDecision::Reject(RejectReason::NoSession)
        );
    }

    #[test]
    fn expired_session_rejects_with_session_expired() {
        let (adapter, _, gate, _) = setup();
        let mut sess = adapter.create().unwrap();
        sess.expires_at = Utc::now() - chrono::Duration::seconds(1);
        adapter.save(&sess).unwrap();
        assert_eq!(
            gate.decide(Some(&sess.id)).unwrap(),
            AccessDecision::Reject(RejectReason::SessionExpired)
        );
    }

    #[test]
    fn anonymous_session_rejects_with_no_identity() {
        let (adapter, _, gate, _) = setup();
        let sess = adapter.create().unwrap();
        assert_eq!(
            gate.decide(Some(&sess.id)).unwrap(),
            AccessDecision::Reject(RejectReason::NoIdentity)
        );
    }

    #[test]
    fn authenticated_session_admits_with_principal() {
        let (_, users, gate, mgr) = setup();
        let rec = users.create_local("u1@example.com", "U One", "p1").unwrap();
        let sess = mgr.login(None, &rec.principal()).unwrap();
        match gate.decide(Some(&sess.id)).unwrap() {
            AccessDecision::Admit(p) => assert_eq!(p.id, rec.id),
            other => panic!("expected admit, got {other:?}"),
        }
    }

    #[test]
    fn reason_codes_are_distinct() {
        let codes = [
            RejectReason::NoSession.code(),
            RejectReason::SessionExpired.code(),
            RejectReason::NoIdentity.code(),
        ];
        assert_eq!(codes.iter().collect::<std::collections::HashSet<_>>().len(), 3);
    }
}
