//! Session → backend bindings.
//!
//! A session is `UNBOUND` until a `HelloGateway` names the backend that owns
//! it; the binding is dropped when the client closes or the backend goes
//! away.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Default)]
pub struct BindingTable {
    bindings: RwLock<HashMap<String, String>>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `ssid` to `server`, returning the previous owner if any.
    pub fn bind(&self, ssid: &str, server: &str) -> Option<String> {
        let previous = self
            .bindings
            .write()
            .insert(ssid.to_string(), server.to_string());
        debug!(session_id = %ssid, server = %server, ?previous, "session bound");
        previous
    }

    /// Drop the binding of `ssid`, returning the server it was bound to.
    pub fn unbind(&self, ssid: &str) -> Option<String> {
        self.bindings.write().remove(ssid)
    }

    pub fn get(&self, ssid: &str) -> Option<String> {
        self.bindings.read().get(ssid).cloned()
    }

    /// Drop every binding owned by `server`, returning the affected sessions.
    pub fn unbind_server(&self, server: &str) -> Vec<String> {
        let mut bindings = self.bindings.write();
        let mut removed = Vec::new();
        bindings.retain(|ssid, owner| {
            if owner == server {
                removed.push(ssid.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn count(&self) -> usize {
        self.bindings.read().len()
    }
}
