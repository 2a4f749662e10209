//! Backend service name → server-facing connection.

use husky_core::Conn;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Backends reachable through this gateway.
#[derive(Default)]
pub struct BackendDirectory {
    backends: RwLock<HashMap<String, Arc<dyn Conn>>>,
}

impl BackendDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` under `name`. A later registration replaces an
    /// earlier one, since a restarted backend re-registers on a new
    /// connection.
    pub fn register(&self, name: &str, conn: Arc<dyn Conn>) {
        let addr = conn.remote_addr();
        let previous = self.backends.write().insert(name.to_string(), conn);
        if previous.is_some() {
            warn!(server = %name, addr = %addr, "backend re-registered");
        } else {
            info!(server = %name, addr = %addr, "backend registered");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Conn>> {
        self.backends.read().get(name).cloned()
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Conn>> {
        let removed = self.backends.write().remove(name);
        if removed.is_some() {
            info!(server = %name, "backend unregistered");
        }
        removed
    }

    /// Remove every name registered by `conn`.
    pub fn unregister_conn(&self, conn: &Arc<dyn Conn>) -> Vec<String> {
        let mut backends = self.backends.write();
        let mut removed = Vec::new();
        backends.retain(|name, registered| {
            if Arc::ptr_eq(registered, conn) {
                removed.push(name.clone());
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            info!(servers = ?removed, "backend connection gone");
        }
        removed
    }

    /// Registered service names, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.backends.read().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.backends.read().len()
    }
}
