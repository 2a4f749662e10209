//! husky-gateway: multiplexes untrusted client connections onto trusted
//! backend servers.
//!
//! Clients talk signed (and optionally compressed) envelopes on one
//! listener; backends talk raw envelopes on another. Every inbound message
//! becomes an item on a single dispatch queue, so gateway state is only ever
//! mutated from one worker.

pub mod backends;
pub mod binding;
pub mod config;
pub mod gateway;
pub mod handlers;
pub mod server;
pub mod transport;

pub use config::GatewayConfig;
pub use gateway::Gateway;
pub use server::{GatewayServer, Running};
