//! Message transport between two isolated contexts.
//!
//! A transport is pure message passing: it carries opaque JSON payloads plus
//! out-of-band binary buffers, FIFO per direction, with no notion of
//! requests or responses. The RPC layer in [`crate::rpc`] sits on top.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Host (daemon)  │         Transport            │  Extension      │
//! │                 │                              │  (sandboxed)    │
//! │  Bridge         │◄────────────────────────────►│  Bridge         │
//! │  sink / inbound │   Envelope {payload, bufs}   │  sink / inbound │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Failure Semantics
//!
//! Posting to a context that is gone never panics. The failure surfaces as
//! the end of the peer's inbound stream, which the bridge turns into
//! "channel closed" for every pending call.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | In-process transport pair |
//! | `connection` | WebSocket-backed transport |
//! | `server` | WebSocket server a sandboxed process connects to |

// ============================================================================
// Submodules
// ============================================================================

/// In-process transport pair.
pub mod channel;

/// WebSocket-backed transport.
pub mod connection;

/// WebSocket server for out-of-process contexts.
pub mod server;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::Transferable;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::pair;
pub use connection::websocket;
pub use server::{PendingServer, connect};

// ============================================================================
// Envelope
// ============================================================================

/// One delivered message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    /// Untrusted structured payload.
    pub payload: Value,
    /// Buffers moved with the payload.
    pub transferables: Vec<Transferable>,
}

impl Envelope {
    /// Creates an envelope.
    #[inline]
    #[must_use]
    pub fn new(payload: Value, transferables: Vec<Transferable>) -> Self {
        Self {
            payload,
            transferables,
        }
    }
}

// ============================================================================
// MessageSink
// ============================================================================

/// Sending half of a transport.
pub trait MessageSink: Send + Sync + 'static {
    /// Enqueues a message for the remote end without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] when the transport knows the
    /// remote end is gone. Transports that cannot tell drop the message.
    fn post(&self, envelope: Envelope) -> Result<()>;

    /// Closes the sending half. The remote inbound stream ends after
    /// already-posted messages are delivered.
    fn close(&self);

    /// Returns `true` once [`close`](Self::close) was called or the remote end is gone.
    fn is_closed(&self) -> bool;
}

/// Receiving half of a transport.
///
/// Owning the receiver is what makes the holder the single delivery callback.
pub type Inbound = mpsc::UnboundedReceiver<Envelope>;

// ============================================================================
// QueueSink
// ============================================================================

/// Sink backed by an unbounded queue.
///
/// Shared by the in-process and WebSocket transports.
pub(crate) struct QueueSink {
    /// Queue into the remote end (or the socket writer). `None` once closed.
    tx: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
}

impl QueueSink {
    /// Wraps a queue sender.
    pub(crate) fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }
}

impl MessageSink for QueueSink {
    fn post(&self, envelope: Envelope) -> Result<()> {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => tx.send(envelope).map_err(|_| Error::ConnectionClosed),
            None => Err(Error::ConnectionClosed),
        }
    }

    fn close(&self) {
        self.tx.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.tx.lock().as_ref().is_none_or(mpsc::UnboundedSender::is_closed)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// One end of a bidirectional channel.
pub struct Transport {
    /// Sending half.
    sink: Arc<dyn MessageSink>,
    /// Receiving half.
    inbound: Inbound,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("closed", &self.sink.is_closed())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Assembles a transport from its halves.
    #[inline]
    #[must_use]
    pub fn new(sink: Arc<dyn MessageSink>, inbound: Inbound) -> Self {
        Self { sink, inbound }
    }

    /// Posts a message to the remote end.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the remote end is known to be gone.
    #[inline]
    pub fn send(&self, payload: Value, transferables: Vec<Transferable>) -> Result<()> {
        self.sink.post(Envelope::new(payload, transferables))
    }

    /// Receives the next message, or `None` once the remote end is gone.
    #[inline]
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inbound.recv().await
    }

    /// Closes the sending half.
    #[inline]
    pub fn close(&self) {
        self.sink.close();
    }

    /// Splits into the sink and the inbound receiver.
    #[inline]
    #[must_use]
    pub fn split(self) -> (Arc<dyn MessageSink>, Inbound) {
        (self.sink, self.inbound)
    }
}
