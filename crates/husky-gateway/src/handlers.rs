//! Message ids served by the gateway and their registration.

use crate::gateway::{Args, Gateway};
use husky_core::{Context, HandlerRegistry};
use std::sync::Arc;
use tracing::warn;

/// Name under which the gateway's own handlers are also reachable
/// (`gateway.HeartBeat`).
pub const SERVICE_NAME: &str = "gateway";

pub const HELLO_GATEWAY: &str = "HelloGateway";
pub const ROUTE: &str = "Route";
pub const BROADCAST: &str = "Broadcast";
pub const SERVER_CLOSE: &str = "ServerClose";
pub const CLOSE: &str = "Close";
pub const HEART_BEAT: &str = "HeartBeat";
pub const REGISTER_SERVICE: &str = "RegisterServiceInGateway";

/// Messages only a backend may send. `HelloGateway` is accepted from both
/// sides; the reply goes to whoever sent it.
const BACKEND_ONLY: [&str; 4] = [ROUTE, BROADCAST, SERVER_CLOSE, REGISTER_SERVICE];

/// Bind every gateway handler into `registry`.
pub fn register(registry: &mut HandlerRegistry, gateway: Arc<Gateway>) {
    registry.serve_as(SERVICE_NAME);

    let bindings: [(&str, fn(&Gateway, &mut Context, Args)); 7] = [
        (HELLO_GATEWAY, Gateway::hello_gateway),
        (ROUTE, Gateway::route),
        (BROADCAST, Gateway::broadcast),
        (SERVER_CLOSE, Gateway::server_close),
        (CLOSE, Gateway::close),
        (HEART_BEAT, Gateway::heart_beat),
        (REGISTER_SERVICE, Gateway::register_service),
    ];
    for (id, handler) in bindings {
        let gateway = gateway.clone();
        registry.bind(id, move |ctx: &mut Context, args: Args| handler(&gateway, ctx, args));
    }

    for id in BACKEND_ONLY {
        registry.hook(id, require_backend);
    }
}

/// Fail requests that arrived on a client channel: those never carry a
/// server name.
fn require_backend(ctx: &mut Context) {
    if ctx.server_name.is_empty() {
        warn!(
            msg_id = %ctx.msg_id,
            session_id = %ctx.ssid,
            addr = %ctx.client_addr,
            "backend message from client channel"
        );
        ctx.fail();
    }
}
