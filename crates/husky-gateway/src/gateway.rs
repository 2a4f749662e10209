//! Gateway routing state and handler logic.
//!
//! Handlers run on the single dispatch worker. Misses (unknown session,
//! unknown backend) are absorbed: the action is skipped and logged at debug
//! level.

use crate::backends::BackendDirectory;
use crate::binding::BindingTable;
use husky_core::route::compose;
use husky_core::session::generate_session_id;
use husky_core::{Conn, Context, Envelope, Session, SessionRegistry};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reported IP when the client address cannot be parsed.
pub const UNKNOWN_IP: &str = "UNKNOWN";

/// Arguments shared by every gateway message.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Args {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "ServerName")]
    pub server_name: String,
    #[serde(rename = "UId")]
    pub uid: i64,
    #[serde(rename = "Data")]
    pub data: Option<Box<RawValue>>,
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Serialize)]
struct HelloReply<'a> {
    #[serde(rename = "UId")]
    uid: i64,
    #[serde(rename = "IP")]
    ip: &'a str,
}

#[derive(Debug, Serialize)]
struct ServerCloseNotice<'a> {
    #[serde(rename = "ServerName")]
    server_name: &'a str,
}

#[derive(Debug, Serialize)]
struct Empty {}

/// Sessions, bindings and backends of one gateway process.
pub struct Gateway {
    sessions: Arc<SessionRegistry>,
    bindings: BindingTable,
    backends: BackendDirectory,
}

impl Gateway {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self {
            sessions,
            bindings: BindingTable::new(),
            backends: BackendDirectory::new(),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    pub fn backends(&self) -> &BackendDirectory {
        &self.backends
    }

    /// Register a freshly accepted client connection. Returns its session id.
    pub fn open_session(&self, out: Arc<dyn Conn>) -> String {
        loop {
            let ssid = generate_session_id();
            if self.sessions.add(Session::new(ssid.as_str(), out.clone())) {
                return ssid;
            }
        }
    }

    /// `HelloGateway`: bind the session to the declared backend and reply
    /// with the uid and the client's IP.
    pub fn hello_gateway(&self, ctx: &mut Context, args: Args) {
        debug!(session_id = %ctx.ssid, "session locate");
        let server = if args.server_name.is_empty() {
            ctx.server_name.as_str()
        } else {
            args.server_name.as_str()
        };

        let mut ip = UNKNOWN_IP.to_string();
        if let Some(session) = self.sessions.get(&ctx.ssid) {
            let addr = session.out.remote_addr();
            debug!(session_id = %ctx.ssid, addr = %addr, server = %server, "hello gateway");
            if server.is_empty() {
                debug!(session_id = %ctx.ssid, "hello without server name, left unbound");
            } else {
                self.bindings.bind(&ctx.ssid, server);
            }
            if let Some(host) = host_of(&addr) {
                ip = host;
            }
        }

        let reply = HelloReply {
            uid: args.uid,
            ip: &ip,
        };
        let result = Envelope::with_body("HelloGateway", &reply)
            .map(|pkg| pkg.session_id(ctx.ssid.as_str()))
            .and_then(|pkg| ctx.out.write_envelope(pkg));
        if let Err(e) = result {
            debug!(session_id = %ctx.ssid, error = %e, "hello reply dropped");
        }
    }

    /// `Route`: deliver a backend message to one client, prefixed with the
    /// backend's name.
    pub fn route(&self, ctx: &mut Context, args: Args) {
        let Some(session) = self.sessions.get(&ctx.ssid) else {
            debug!(session_id = %ctx.ssid, msg = %args.id, "route to unknown session");
            return;
        };
        let pkg = Envelope {
            id: compose(&ctx.server_name, &args.id),
            data: args.data,
            ..Default::default()
        };
        if let Err(e) = session.out.write_envelope(pkg) {
            debug!(session_id = %ctx.ssid, error = %e, "route dropped");
        }
    }

    /// `Broadcast`: deliver a backend message to every session.
    pub fn broadcast(&self, _ctx: &mut Context, args: Args) {
        let sessions = self.sessions.list();
        debug!(msg = %args.id, sessions = sessions.len(), "broadcast");
        for session in sessions {
            let pkg = Envelope {
                id: args.id.clone(),
                data: args.data.clone(),
                ..Default::default()
            };
            if let Err(e) = session.out.write_envelope(pkg) {
                debug!(session_id = %session.id, error = %e, "broadcast dropped");
            }
        }
    }

    /// `ServerClose`: tell every session the backend left, then forget it.
    pub fn server_close(&self, ctx: &mut Context, _args: Args) {
        let notice = ServerCloseNotice {
            server_name: &ctx.server_name,
        };
        for session in self.sessions.list() {
            if let Err(e) = session.out.write_json("ServerClose", &notice) {
                debug!(session_id = %session.id, error = %e, "server close notice dropped");
            }
        }
        self.backend_gone(&ctx.server_name);
    }

    /// `Close`: notify the bound backend, if any, and drop the binding. The
    /// session stays registered until its connection goes away.
    pub fn close(&self, ctx: &mut Context, _args: Args) {
        debug!(session_id = %ctx.ssid, "session close");
        let client_addr = self
            .sessions
            .get(&ctx.ssid)
            .map(|s| s.client_addr().to_string())
            .unwrap_or_else(|| ctx.client_addr.clone());
        self.release(&ctx.ssid, &client_addr);
    }

    /// The client connection is gone: release its binding and drop the
    /// session. Only the transport queues this.
    pub fn session_closed(&self, ctx: &mut Context) {
        debug!(session_id = %ctx.ssid, "session closed");
        let client_addr = self
            .sessions
            .remove(&ctx.ssid)
            .map(|s| s.client_addr().to_string())
            .unwrap_or_else(|| ctx.client_addr.clone());
        self.release(&ctx.ssid, &client_addr);
    }

    /// `HeartBeat`: empty acknowledgement.
    pub fn heart_beat(&self, ctx: &mut Context, _args: Args) {
        let Some(session) = self.sessions.get(&ctx.ssid) else {
            return;
        };
        if let Err(e) = session.write_json("HeartBeat", &Empty {}) {
            debug!(session_id = %ctx.ssid, error = %e, "heartbeat dropped");
        }
    }

    /// `RegisterServiceInGateway`: make the sending backend addressable as
    /// `args.name`.
    pub fn register_service(&self, ctx: &mut Context, args: Args) {
        let name = if args.name.is_empty() {
            ctx.server_name.as_str()
        } else {
            args.name.as_str()
        };
        if name.is_empty() {
            warn!(addr = %ctx.out.remote_addr(), "service registration without a name");
            return;
        }
        self.backends.register(name, ctx.out.clone());
    }

    /// Forward a client message addressed as `<server>.<message>` to that
    /// backend.
    pub fn forward(&self, ctx: &mut Context, server: &str, message: &str, data: Option<Box<RawValue>>) {
        self.send_to_backend(server, message, &ctx.ssid, &ctx.client_addr, data);
    }

    /// Clean up after a server-facing connection dropped.
    pub fn backend_disconnected(&self, conn: &Arc<dyn Conn>) {
        for name in self.backends.unregister_conn(conn) {
            let sessions = self.bindings.unbind_server(&name);
            info!(server = %name, unbound = sessions.len(), "backend disconnected");
        }
    }

    fn release(&self, ssid: &str, client_addr: &str) {
        if let Some(server) = self.bindings.unbind(ssid) {
            self.send_to_backend(&server, "Close", ssid, client_addr, None);
        }
    }

    fn backend_gone(&self, server: &str) {
        self.backends.unregister(server);
        let sessions = self.bindings.unbind_server(server);
        info!(server = %server, unbound = sessions.len(), "server close");
    }

    fn send_to_backend(
        &self,
        server: &str,
        message: &str,
        ssid: &str,
        client_addr: &str,
        data: Option<Box<RawValue>>,
    ) {
        let Some(backend) = self.backends.get(server) else {
            debug!(server = %server, msg = %message, session_id = %ssid, "no such backend");
            return;
        };
        let data = match data {
            Some(data) => Some(data),
            None => RawValue::from_string("{}".to_string()).ok(),
        };
        let pkg = Envelope {
            id: message.to_string(),
            data,
            ..Default::default()
        }
        .session_id(ssid)
        .server_name(server)
        .client_addr(client_addr);
        if let Err(e) = backend.write_envelope(pkg) {
            warn!(server = %server, msg = %message, error = %e, "forward to backend failed");
        }
    }
}

/// Host part of a `host:port` address.
pub fn host_of(addr: &str) -> Option<String> {
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return Some(sock.ip().to_string());
    }
    match addr.rsplit_once(':') {
        Some((host, _)) if !host.is_empty() && !host.contains(':') => Some(host.to_string()),
        _ => None,
    }
}
