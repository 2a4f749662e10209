//! Abstract connection for outbound traffic.
//!
//! The core never owns sockets. A transport hands the core a [`Conn`] per
//! peer and drains whatever is written to it.

use crate::envelope::Envelope;
use crate::error::{HuskyError, HuskyResult};
use crate::scheme::Scheme;
use serde::Serialize;
use tokio::sync::mpsc;

/// One peer connection, as seen by handlers.
pub trait Conn: Send + Sync {
    /// Remote address as `host:port`.
    fn remote_addr(&self) -> String;

    /// Queue an encoded envelope for sending. Must not block.
    fn write(&self, buf: Vec<u8>) -> HuskyResult<()>;
}

impl dyn Conn {
    /// Encode `envelope` with the raw scheme and write it.
    pub fn write_envelope(&self, envelope: Envelope) -> HuskyResult<()> {
        let buf = envelope.encode(&Scheme::raw(), false)?;
        self.write(buf)
    }

    /// Write a named reply with a JSON body.
    pub fn write_json<T: Serialize + ?Sized>(&self, id: &str, body: &T) -> HuskyResult<()> {
        self.write_envelope(Envelope::with_body(id, body)?)
    }
}

/// A [`Conn`] backed by a bounded channel drained by a writer task.
pub struct ChannelConn {
    addr: String,
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelConn {
    pub fn new(addr: impl Into<String>, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            addr: addr.into(),
            tx,
        }
    }
}

impl Conn for ChannelConn {
    fn remote_addr(&self) -> String {
        self.addr.clone()
    }

    fn write(&self, buf: Vec<u8>) -> HuskyResult<()> {
        self.tx.try_send(buf).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                HuskyError::Transport(format!("{}: write queue full", self.addr))
            }
            mpsc::error::TrySendError::Closed(_) => {
                HuskyError::Transport(format!("{}: connection closed", self.addr))
            }
        })
    }
}
