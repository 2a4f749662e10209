//! Live client sessions.
//!
//! The registry is the sole owner of every [`Session`]; handlers borrow them
//! by id through shared `Arc`s.

use crate::conn::Conn;
use crate::envelope::Envelope;
use crate::error::HuskyResult;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One live client connection.
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Connection to the client.
    pub out: Arc<dyn Conn>,
    /// Client address captured when the session was created.
    client_addr: String,
}

impl Session {
    pub fn new(id: impl Into<String>, out: Arc<dyn Conn>) -> Self {
        let client_addr = out.remote_addr();
        Self {
            id: id.into(),
            out,
            client_addr,
        }
    }

    pub fn client_addr(&self) -> &str {
        &self.client_addr
    }

    /// Write a named reply stamped with this session's id.
    pub fn write_json<T: Serialize + ?Sized>(&self, id: &str, body: &T) -> HuskyResult<()> {
        let pkg = Envelope::with_body(id, body)?.session_id(self.id.as_str());
        self.out.write_envelope(pkg)
    }
}

/// Concurrent map of live sessions.
///
/// Reads (`get`, `list`, `count`) share the lock; `add` and `remove` take it
/// exclusively.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session.
    ///
    /// An id already present is a conflict: the existing session is kept,
    /// the new one dropped, and `false` returned.
    pub fn add(&self, session: Session) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id) {
            warn!(session_id = %session.id, "session exist");
            return false;
        }
        debug!(session_id = %session.id, addr = %session.client_addr, "session added");
        sessions.insert(session.id.clone(), Arc::new(session));
        true
    }

    /// Remove a session by id. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            debug!(session_id = %id, "session removed");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Snapshot of all sessions, in no particular order.
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }
}

/// Generate a random session ID (hex-encoded, 16 bytes = 32 hex chars).
pub fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}
