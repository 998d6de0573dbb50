//! Session persistence: the store contract, the in-memory implementation,
//! and the capability-detecting adapter that the lifecycle manager talks to.

use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// One browsing context, anonymous or authenticated. `identity` holds the
/// user id of the verified principal and is only ever set by the lifecycle
/// manager after a successful regenerate+save.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub identity: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    #[error("session store rejected {op}: {reason}")]
    Rejected { op: &'static str, reason: String },
}

/// What the backing store supports natively. Constrained deployments run
/// stores without first-class `regenerate`/`save`; the adapter shims those.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub regenerate: bool,
    pub save: bool,
}

/// Minimal store contract. All methods are synchronous under the store's own
/// locking; the adapter layers per-id mutation serialization on top.
pub trait SessionStore: Send + Sync {
    fn capabilities(&self) -> Capabilities;
    fn create(&self) -> Result<Session, StoreError>;
    fn load(&self, sid: &str) -> Result<Option<Session>, StoreError>;
    /// New id, same payload; the old record must stop resolving.
    fn regenerate(&self, session: &Session) -> Result<Session, StoreError>;
    fn save(&self, session: &Session) -> Result<(), StoreError>;
    /// Destroying an unknown id is a no-op success.
    fn destroy(&self, sid: &str) -> Result<(), StoreError>;
}

/// 128-bit random token, base64url without padding.
pub fn new_session_id() -> String {
    let mut buf = [0u8; 16];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

fn blank_session(ttl: Duration) -> Session {
    let now = Utc::now();
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
    Session {
        id: new_session_id(),
        identity: None,
        created_at: now,
        last_touched_at: now,
        expires_at: now + ttl,
    }
}

/// Full-capability in-memory store.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), ttl }
    }

    /// Drop records past `expires_at`. Correctness never depends on this;
    /// the gate already treats expired sessions as absent.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut map = self.sessions.write();
        let before = map.len();
        map.retain(|_, s| !s.is_expired(now));
        before - map.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }
}

impl SessionStore for MemorySessionStore {
    fn capabilities(&self) -> Capabilities {
        Capabilities { regenerate: true, save: true }
    }

    fn create(&self) -> Result<Session, StoreError> {
        let sess = blank_session(self.ttl);
        self.sessions.write().insert(sess.id.clone(), sess.clone());
        Ok(sess)
    }

    fn load(&self, sid: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().get(sid).cloned())
    }

    fn regenerate(&self, session: &Session) -> Result<Session, StoreError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        let fresh = Session {
            id: new_session_id(),
            last_touched_at: now,
            expires_at: now + ttl,
            ..session.clone()
        };
        let mut map = self.sessions.write();
        map.remove(&session.id);
        map.insert(fresh.id.clone(), fresh.clone());
        Ok(fresh)
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions.write().insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn destroy(&self, sid: &str) -> Result<(), StoreError> {
        self.sessions.write().remove(sid);
        Ok(())
    }
}

/// Per-session-id lock table. Each mutation on the same id runs as one
/// logical transaction; two mutations on different ids never contend.
#[derive(Default)]
struct LockTable {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockTable {
    fn for_id(&self, sid: &str) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock();
        map.entry(sid.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn release(&self, sid: &str) {
        let mut map = self.locks.lock();
        // Only the map's reference left: nobody is waiting on this id.
        let idle = map.get(sid).map_or(false, |l| Arc::strong_count(l) == 1);
        if idle {
            map.remove(sid);
        }
    }
}

/// Wraps a store and guarantees the full mutation surface. Capability gaps
/// are detected once, at attach time, and covered by shims:
///
/// - shimmed `regenerate` synthesizes a fresh id and copies the payload,
///   removing the old record on a best-effort basis;
/// - shimmed `save` is a confirmed no-op so sequencing callers still get a
///   completion signal.
///
/// The shims keep the lifecycle manager's ordering contract intact; they are
/// not a persistence guarantee and are logged as best-effort at attach time.
pub struct StoreAdapter {
    inner: Arc<dyn SessionStore>,
    shim_regenerate: bool,
    shim_save: bool,
    locks: LockTable,
}

impl StoreAdapter {
    pub fn attach(inner: Arc<dyn SessionStore>) -> Self {
        let caps = inner.capabilities();
        if !caps.regenerate {
            warn!("session store lacks regenerate; installing best-effort shim");
        }
        if !caps.save {
            warn!("session store lacks save; installing no-op completion shim");
        }
        Self {
            inner,
            shim_regenerate: !caps.regenerate,
            shim_save: !caps.save,
            locks: LockTable::default(),
        }
    }

    pub fn create(&self) -> Result<Session, StoreError> {
        self.inner.create()
    }

    pub fn load(&self, sid: &str) -> Result<Option<Session>, StoreError> {
        self.inner.load(sid)
    }

    pub fn regenerate(&self, session: &Session) -> Result<Session, StoreError> {
        let lock = self.locks.for_id(&session.id);
        let result = {
            let _g = lock.lock();
            if self.shim_regenerate {
                // Synthesize the rotation: new id, same payload. The old
                // record is removed if the store lets us; either way the
                // caller proceeds with the fresh id.
                let fresh = Session { id: new_session_id(), ..session.clone() };
                if let Err(e) = self.inner.destroy(&session.id) {
                    debug!("shimmed regenerate could not remove old session: {e}");
                }
                Ok(fresh)
            } else {
                self.inner.regenerate(session)
            }
        };
        drop(lock);
        self.locks.release(&session.id);
        result
    }

    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        let lock = self.locks.for_id(&session.id);
        let result = {
            let _g = lock.lock();
            if self.shim_save {
                // Confirmed no-op: callers waiting on completion proceed.
                Ok(())
            } else {
                self.inner.save(session)
            }
        };
        drop(lock);
        self.locks.release(&session.id);
        result
    }

    pub fn destroy(&self, sid: &str) -> Result<(), StoreError> {
        let lock = self.locks.for_id(sid);
        let result = {
            let _g = lock.lock();
            self.inner.destroy(sid)
        };
        drop(lock);
        self.locks.release(sid);
        result
    }
}


#[cfg(test)]
mod tests {
    use super::testing::LimitedStore;
    use super::*;

    fn adapter() -> (Arc<MemorySessionStore>, StoreAdapter) {
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(3600)));
        let adapter = StoreAdapter::attach(store.clone());
        (store, adapter)
    }

    #[test]
    fn create_then_load_roundtrip() {
        let (_, adapter) = adapter();
        let sess = adapter.create().unwrap();
        assert!(sess.identity.is_none());
        let loaded = adapter.load(&sess.id).unwrap().unwrap();
        assert_eq!(loaded, sess);
    }

    #[test]
    fn regenerate_rotates_id_and_drops_old_record() {
        let (_, adapter) = adapter();
        let sess = adapter.create().unwrap();
        let fresh = adapter.regenerate(&sess).unwrap();
        assert_ne!(fresh.id, sess.id);
        assert_eq!(fresh.identity, sess.identity);
        assert!(adapter.load(&sess.id).unwrap().is_none());
        assert!(adapter.load(&fresh.id).unwrap().is_some());
    }

    #[test]
    fn destroy_is_idempotent() {
        let (_, adapter) = adapter();
        let sess = adapter.create().unwrap();
        adapter.destroy(&sess.id).unwrap();
        // Second destroy of the same id must still succeed.
        adapter.destroy(&sess.id).unwrap();
        assert!(adapter.load(&sess.id).unwrap().is_none());
    }

    #[test]
    fn shimmed_regenerate_synthesizes_new_id() {
        let adapter = StoreAdapter::attach(Arc::new(LimitedStore::new(Duration::from_secs(3600))));
        let sess = adapter.create().unwrap();
        let fresh = adapter.regenerate(&sess).unwrap();
        assert_ne!(fresh.id, sess.id);
        // Best-effort removal of the old record went through destroy.
        assert!(adapter.load(&sess.id).unwrap().is_none());
    }

    #[test]
    fn shimmed_save_reports_completion() {
        let adapter = StoreAdapter::attach(Arc::new(LimitedStore::new(Duration::from_secs(3600))));
        let mut sess = adapter.create().unwrap();
        sess.identity = Some("u1".into());
        // The shim confirms completion even though nothing is persisted.
        adapter.save(&sess).unwrap();
        let stored = adapter.load(&sess.id).unwrap().unwrap();
        assert!(stored.identity.is_none());
    }

    #[test]
    fn sweep_removes_only_expired_sessions() {
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(3600)));
        let adapter = StoreAdapter::attach(store.clone());
        let live = adapter.create().unwrap();
        let mut dead = adapter.create().unwrap();
        dead.expires_at = Utc::now() - chrono::Duration::seconds(1);
        adapter.save(&dead).unwrap();
        assert_eq!(store.sweep_expired(), 1);
        assert!(store.load(&live.id).unwrap().is_some());
        assert!(store.load(&dead.id).unwrap().is_none());
    }

    #[test]
    fn session_ids_are_urlsafe_and_distinct() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
