//! Gateway process: wires the registries, the dispatch worker and both
//! listeners together and coordinates shutdown.

use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::handlers;
use crate::transport::{start_listener, Channel, Endpoint};
use husky_core::{dispatch_queue, HandlerRegistry, HuskyResult, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The gateway server instance.
pub struct GatewayServer {
    config: GatewayConfig,
    gateway: Arc<Gateway>,
    registry: Arc<HandlerRegistry>,
    /// Broadcast sender for shutdown of listeners and the worker.
    shutdown_tx: broadcast::Sender<()>,
}

/// Addresses the listeners actually bound, plus the worker handle.
pub struct Running {
    pub client_addr: SocketAddr,
    pub server_addr: SocketAddr,
    worker: JoinHandle<()>,
}

impl Running {
    /// Wait for the dispatch worker to finish draining.
    pub async fn join(self) {
        if let Err(e) = self.worker.await {
            warn!(error = %e, "dispatch worker aborted");
        }
    }
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Self {
        let gateway = Arc::new(Gateway::new(Arc::new(SessionRegistry::new())));
        let mut registry = HandlerRegistry::new();
        handlers::register(&mut registry, gateway.clone());

        Self {
            config,
            gateway,
            registry: Arc::new(registry),
            shutdown_tx: broadcast::channel(1).0,
        }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Spawn the dispatch worker and start both listeners.
    pub async fn start(&self) -> HuskyResult<Running> {
        let (dispatcher, worker) = dispatch_queue(self.config.dispatch.clone());
        let worker = tokio::spawn(worker.run(self.shutdown_tx.subscribe()));

        let client = Arc::new(Endpoint {
            channel: Channel::Client,
            scheme: self.config.client_scheme.clone(),
            zip: true,
            max_frame: self.config.max_frame,
            write_queue: self.config.write_queue,
            registry: self.registry.clone(),
            dispatcher: dispatcher.clone(),
            gateway: self.gateway.clone(),
        });
        let server = Arc::new(Endpoint {
            channel: Channel::Server,
            scheme: self.config.server_scheme.clone(),
            zip: false,
            max_frame: self.config.max_frame,
            write_queue: self.config.write_queue,
            registry: self.registry.clone(),
            dispatcher,
            gateway: self.gateway.clone(),
        });

        let client_addr =
            start_listener(self.config.client_addr, client, self.shutdown_tx.subscribe()).await?;
        let server_addr =
            start_listener(self.config.server_addr, server, self.shutdown_tx.subscribe()).await?;

        info!(
            client_addr = %client_addr,
            server_addr = %server_addr,
            client_scheme = self.config.client_scheme.name(),
            server_scheme = self.config.server_scheme.name(),
            "husky-gateway ready"
        );

        Ok(Running {
            client_addr,
            server_addr,
            worker,
        })
    }

    /// Stop accepting connections and let the worker drain.
    pub fn shutdown(&self) {
        info!(
            sessions = self.gateway.sessions().count(),
            backends = self.gateway.backends().count(),
            "shutting down"
        );
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use husky_core::{frame_encode, Envelope, Scheme};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn local_config() -> GatewayConfig {
        let mut config =
            GatewayConfig::load(None, Some("127.0.0.1:0"), Some("127.0.0.1:0"), false).unwrap();
        config.dispatch.tick = Duration::from_millis(5);
        config
    }

    async fn send(stream: &mut TcpStream, pkg: Envelope, scheme: &Scheme, zip: bool) {
        let buf = pkg.encode(scheme, zip).unwrap();
        stream.write_all(&frame_encode(&buf)).await.unwrap();
    }

    async fn recv(stream: &mut TcpStream) -> Envelope {
        tokio::time::timeout(Duration::from_secs(5), async {
            let mut len = [0u8; 4];
            stream.read_exact(&mut len).await.unwrap();
            let mut buf = vec![0u8; u32::from_be_bytes(len) as usize];
            stream.read_exact(&mut buf).await.unwrap();
            Envelope::decode(&buf, &Scheme::raw(), false).unwrap()
        })
        .await
        .expect("no frame within 5s")
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn client_backend_round_trip() {
        let server = GatewayServer::new(local_config());
        let running = server.start().await.unwrap();
        let client_scheme = Scheme::default();

        let mut backend = TcpStream::connect(running.server_addr).await.unwrap();
        send(
            &mut backend,
            Envelope::with_body("RegisterServiceInGateway", &json!({"Name": "hall"}))
                .unwrap()
                .server_name("hall"),
            &Scheme::raw(),
            false,
        )
        .await;
        let gateway = server.gateway().clone();
        wait_until(|| gateway.backends().count() == 1).await;

        let mut client = TcpStream::connect(running.client_addr).await.unwrap();
        send(
            &mut client,
            Envelope::with_body("HelloGateway", &json!({"ServerName": "hall", "UId": 5})).unwrap(),
            &client_scheme,
            true,
        )
        .await;
        let hello = recv(&mut client).await;
        assert_eq!(hello.id, "HelloGateway");
        let ssid = hello.session_id.clone();
        assert_eq!(ssid.len(), 32);
        let body: Value = hello.body().unwrap();
        assert_eq!(body["UId"], 5);
        assert_eq!(body["IP"], "127.0.0.1");

        // Client -> backend forwarding, with session metadata attached.
        send(
            &mut client,
            Envelope::with_body("hall.Enter", &json!({"Room": 3})).unwrap(),
            &client_scheme,
            true,
        )
        .await;
        let forwarded = recv(&mut backend).await;
        assert_eq!(forwarded.id, "Enter");
        assert_eq!(forwarded.session_id, ssid);
        assert_eq!(forwarded.server_name, "hall");
        assert!(forwarded.client_addr.starts_with("127.0.0.1:"));
        assert_eq!(forwarded.data_str(), r#"{"Room":3}"#);

        // Backend -> client routing, prefixed with the backend's name.
        send(
            &mut backend,
            Envelope::with_body("Route", &json!({"Id": "Welcome", "Data": {"ok": true}}))
                .unwrap()
                .session_id(ssid.as_str())
                .server_name("hall"),
            &Scheme::raw(),
            false,
        )
        .await;
        let routed = recv(&mut client).await;
        assert_eq!(routed.id, "hall.Welcome");
        assert_eq!(routed.data_str(), r#"{"ok":true}"#);

        // Client hang-up reaches the bound backend.
        drop(client);
        let close = recv(&mut backend).await;
        assert_eq!(close.id, "Close");
        assert_eq!(close.session_id, ssid);
        wait_until(|| gateway.sessions().count() == 0).await;

        server.shutdown();
        running.join().await;
    }

    #[tokio::test]
    async fn badly_signed_client_traffic_is_dropped() {
        let server = GatewayServer::new(local_config());
        let running = server.start().await.unwrap();

        let mut client = TcpStream::connect(running.client_addr).await.unwrap();
        // Unsigned: no Sign field at all.
        send(
            &mut client,
            Envelope::new("HeartBeat"),
            &Scheme::raw(),
            false,
        )
        .await;
        // Signed with a different key.
        send(
            &mut client,
            Envelope::new("HeartBeat"),
            &Scheme::default().with_key("wrong"),
            true,
        )
        .await;
        send(
            &mut client,
            Envelope::new("gateway.HeartBeat"),
            &Scheme::default(),
            true,
        )
        .await;

        let reply = recv(&mut client).await;
        assert_eq!(reply.id, "HeartBeat");
        assert_eq!(reply.data_str(), "{}");

        server.shutdown();
        running.join().await;
    }

    #[tokio::test]
    async fn client_sent_close_keeps_connection_usable() {
        let server = GatewayServer::new(local_config());
        let running = server.start().await.unwrap();
        let gateway = server.gateway().clone();

        let mut client = TcpStream::connect(running.client_addr).await.unwrap();
        wait_until(|| gateway.sessions().count() == 1).await;
        send(&mut client, Envelope::new("Close"), &Scheme::default(), true).await;
        send(&mut client, Envelope::new("HeartBeat"), &Scheme::default(), true).await;

        assert_eq!(recv(&mut client).await.id, "HeartBeat");
        assert_eq!(gateway.sessions().count(), 1);

        drop(client);
        wait_until(|| gateway.sessions().count() == 0).await;

        server.shutdown();
        running.join().await;
    }

    #[tokio::test]
    async fn backend_disconnect_unbinds_sessions() {
        let server = GatewayServer::new(local_config());
        let running = server.start().await.unwrap();
        let gateway = server.gateway().clone();

        let mut backend = TcpStream::connect(running.server_addr).await.unwrap();
        send(
            &mut backend,
            Envelope::new("RegisterServiceInGateway").server_name("chat"),
            &Scheme::raw(),
            false,
        )
        .await;
        wait_until(|| gateway.backends().count() == 1).await;

        let mut client = TcpStream::connect(running.client_addr).await.unwrap();
        send(
            &mut client,
            Envelope::with_body("HelloGateway", &json!({"ServerName": "chat"})).unwrap(),
            &Scheme::default(),
            true,
        )
        .await;
        recv(&mut client).await;
        assert_eq!(gateway.bindings().count(), 1);

        drop(backend);
        wait_until(|| gateway.backends().count() == 0).await;
        wait_until(|| gateway.bindings().count() == 0).await;
        assert_eq!(gateway.sessions().count(), 1);

        server.shutdown();
        running.join().await;
    }
}
