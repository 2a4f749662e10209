//! Per-request context handed to hooks and handlers.

use crate::conn::Conn;
use crate::envelope::Envelope;
use std::sync::Arc;

/// Per-request state. Lives for exactly one dispatch item.
pub struct Context {
    /// Connection the request arrived on; replies go here.
    pub out: Arc<dyn Conn>,
    pub msg_id: String,
    /// Sender's session id.
    pub ssid: String,
    /// Protocol version, currently unused.
    pub version: i32,
    /// Declared server name of the sender. Empty on client channels.
    pub server_name: String,
    pub client_addr: String,
    /// Local service name the id was matched under, when several services
    /// share one listener.
    pub match_server: String,
    failed: bool,
}

impl Context {
    pub fn new(out: Arc<dyn Conn>, msg_id: impl Into<String>) -> Self {
        Self {
            out,
            msg_id: msg_id.into(),
            ssid: String::new(),
            version: 0,
            server_name: String::new(),
            client_addr: String::new(),
            match_server: String::new(),
            failed: false,
        }
    }

    /// Context for an envelope received from a trusted server channel.
    pub fn from_envelope(out: Arc<dyn Conn>, pkg: &Envelope) -> Self {
        Self {
            ssid: pkg.session_id.clone(),
            version: pkg.version,
            server_name: pkg.server_name.clone(),
            client_addr: pkg.client_addr.clone(),
            ..Self::new(out, pkg.id.clone())
        }
    }

    /// Skip the main handler of this request.
    pub fn fail(&mut self) {
        self.failed = true;
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }
}
