//! Server-side session machinery: store contract + adapter, lifecycle
//! sequencing, and the per-request access gate.

pub mod gate;
pub mod lifecycle;
pub mod store;

pub use gate::{AccessDecision, AccessGate, RejectReason};
pub use lifecycle::SessionManager;
pub use store::{MemorySessionStore, Session, SessionStore, StoreAdapter, StoreError};
