//! TCP listeners for the client-facing and server-facing channels.
//!
//! Each accepted connection gets a reader loop (this task) and a writer task
//! draining a bounded channel, so handlers never block on a slow socket.
//! Every decoded envelope becomes a [`DispatchItem`] on the shared queue.

use crate::gateway::Gateway;
use husky_core::route::split;
use husky_core::{
    frame_encode, ChannelConn, Conn, Context, DispatchItem, Dispatcher, Envelope, FrameDecoder,
    HandlerRegistry, HuskyError, HuskyResult, Scheme,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Which side of the gateway a listener serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Untrusted client connections. Each one owns a session.
    Client,
    /// Trusted backend servers. Envelope metadata is taken as-is.
    Server,
}

/// Everything a listener needs to turn bytes into dispatch items.
pub struct Endpoint {
    pub channel: Channel,
    pub scheme: Scheme,
    /// Expect compressed bodies.
    pub zip: bool,
    pub max_frame: usize,
    /// Outbound frames buffered per connection before writes fail.
    pub write_queue: usize,
    pub registry: Arc<HandlerRegistry>,
    pub dispatcher: Dispatcher,
    pub gateway: Arc<Gateway>,
}

/// Dispatch id of the cleanup queued when a client connection drops. Never
/// bound in the handler registry, so it cannot arrive over the wire.
const SESSION_CLOSED: &str = "SessionClosed";

/// Per-connection reader state.
struct Peer {
    conn: Arc<dyn Conn>,
    /// Session id; client channel only.
    ssid: String,
    /// Last server name the backend declared; server channel only.
    server_name: String,
}

/// Bind `bind_addr` and accept connections until `shutdown` fires.
///
/// Returns the bound address, which differs from `bind_addr` when port 0 was
/// requested.
pub async fn start_listener(
    bind_addr: SocketAddr,
    endpoint: Arc<Endpoint>,
    mut shutdown: broadcast::Receiver<()>,
) -> HuskyResult<SocketAddr> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| HuskyError::Transport(format!("bind {bind_addr} failed: {e}")))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, channel = ?endpoint.channel, "listener started");

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(addr = %local_addr, channel = ?endpoint.channel, "listener stopped");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let endpoint = endpoint.clone();
                        tokio::spawn(async move {
                            if let Err(e) = endpoint.handle_connection(stream, addr).await {
                                warn!(remote = %addr, error = %e, "connection error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "TCP accept failed");
                    }
                },
            }
        }
    });

    Ok(local_addr)
}

impl Endpoint {
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> HuskyResult<()> {
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(self.write_queue.max(1));
        tokio::spawn(async move {
            while let Some(buf) = rx.recv().await {
                if let Err(e) = writer.write_all(&frame_encode(&buf)).await {
                    debug!(remote = %addr, error = %e, "write failed");
                    break;
                }
            }
        });

        let conn: Arc<dyn Conn> = Arc::new(ChannelConn::new(addr.to_string(), tx));
        let ssid = match self.channel {
            Channel::Client => self.gateway.open_session(conn.clone()),
            Channel::Server => String::new(),
        };
        debug!(remote = %addr, channel = ?self.channel, session_id = %ssid, "connection accepted");

        let mut peer = Peer {
            conn,
            ssid,
            server_name: String::new(),
        };
        let result = self.read_loop(&mut reader, &mut peer).await;
        self.disconnect(peer).await;
        result
    }

    async fn read_loop(
        &self,
        reader: &mut tokio::net::tcp::OwnedReadHalf,
        peer: &mut Peer,
    ) -> HuskyResult<()> {
        let mut decoder = FrameDecoder::new(self.max_frame);
        let mut buf = vec![0u8; 8192];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            for frame in decoder.feed(&buf[..n])? {
                self.inbound(peer, &frame).await?;
            }
        }
    }

    /// Decode one frame and queue it. Frames that fail to decode, or name
    /// nothing this gateway can serve, are dropped.
    async fn inbound(&self, peer: &mut Peer, frame: &[u8]) -> HuskyResult<()> {
        let pkg = match Envelope::decode(frame, &self.scheme, self.zip) {
            Ok(pkg) => pkg,
            Err(rejected) => {
                debug!(
                    remote = %peer.conn.remote_addr(),
                    msg_id = rejected.envelope.as_ref().map(|p| p.id.as_str()).unwrap_or_default(),
                    error = %rejected,
                    "envelope dropped"
                );
                return Ok(());
            }
        };

        let ctx = match self.channel {
            Channel::Client => {
                let mut ctx = Context::new(peer.conn.clone(), pkg.id.clone());
                ctx.ssid = peer.ssid.clone();
                ctx.client_addr = peer.conn.remote_addr();
                ctx
            }
            Channel::Server => {
                if !pkg.server_name.is_empty() {
                    peer.server_name = pkg.server_name.clone();
                }
                let mut ctx = Context::from_envelope(peer.conn.clone(), &pkg);
                if ctx.server_name.is_empty() {
                    ctx.server_name = peer.server_name.clone();
                }
                ctx
            }
        };

        let item = if self.registry.contains(&pkg.id) {
            match self.registry.resolve(ctx, pkg.data.as_deref()) {
                Ok(item) => item,
                Err(e) => {
                    debug!(msg_id = %pkg.id, error = %e, "bad arguments");
                    return Ok(());
                }
            }
        } else {
            let (server, message) = split(&pkg.id);
            if self.channel == Channel::Server || server.is_empty() {
                debug!(msg_id = %pkg.id, channel = ?self.channel, "unknown message");
                return Ok(());
            }
            let (server, message) = (server.to_string(), message.to_string());
            let gateway = self.gateway.clone();
            let data = pkg.data;
            DispatchItem::new(ctx, move |ctx: &mut Context| {
                gateway.forward(ctx, &server, &message, data)
            })
        };

        self.dispatcher.enqueue(item).await
    }

    /// Queue the cleanup for a closed connection.
    async fn disconnect(&self, peer: Peer) {
        let item = match self.channel {
            Channel::Client => {
                let mut ctx = Context::new(peer.conn.clone(), SESSION_CLOSED);
                ctx.ssid = peer.ssid;
                ctx.client_addr = peer.conn.remote_addr();
                let gateway = self.gateway.clone();
                DispatchItem::new(ctx, move |ctx: &mut Context| gateway.session_closed(ctx))
            }
            Channel::Server => {
                let gateway = self.gateway.clone();
                DispatchItem::new(
                    Context::new(peer.conn, "BackendDisconnected"),
                    move |ctx: &mut Context| gateway.backend_disconnected(&ctx.out),
                )
            }
        };
        if self.dispatcher.enqueue(item).await.is_err() {
            debug!("dispatch queue closed, disconnect not processed");
        }
    }
}
