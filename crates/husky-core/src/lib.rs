//! husky-core: shared protocol library for the husky gateway.
//!
//! Provides the signed envelope codec, signature schemes, length-prefixed
//! framing, routing keys, the single-consumer dispatch queue, typed handler
//! registration and the live session registry.

pub mod conn;
pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod registry;
pub mod route;
pub mod scheme;
pub mod session;

// Re-export commonly used items at crate root.
pub use conn::{ChannelConn, Conn};
pub use context::Context;
pub use dispatch::{dispatch_queue, DispatchConfig, DispatchItem, DispatchWorker, Dispatcher, Wait};
pub use envelope::{Envelope, Rejected};
pub use error::{HuskyError, HuskyResult};
pub use frame::{frame_encode, FrameDecoder};
pub use registry::{HandlerRegistry, Hook};
pub use route::{compose, route_message, split};
pub use scheme::Scheme;
pub use session::{Session, SessionRegistry};
