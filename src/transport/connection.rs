//! WebSocket-backed transport.
//!
//! Carries envelopes between a host and an out-of-process context over one
//! WebSocket. The transport has no request/response knowledge; it only moves
//! frames in both directions.
//!
//! # Frame Format
//!
//! Each text frame is one envelope:
//!
//! ```json
//! { "message": <payload>, "transfer": ["<base64>", ...] }
//! ```
//!
//! `transfer` is omitted when the envelope carries no buffers.
//!
//! # Event Loop
//!
//! The transport spawns a tokio task that handles:
//!
//! - Incoming frames, decoded and pushed to the inbound queue
//! - Outgoing envelopes from the sink, encoded and written in order
//! - Closing the socket once the sink is closed and drained

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::Transferable;

use super::{Envelope, QueueSink, Transport};

// ============================================================================
// WireFrame
// ============================================================================

/// Text frame layout.
#[derive(Debug, Serialize, Deserialize)]
struct WireFrame {
    /// Envelope payload.
    message: Value,
    /// Base64-encoded transferables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    transfer: Vec<String>,
}

/// Encodes an envelope into a text frame.
fn encode_frame(envelope: Envelope) -> Result<String> {
    let frame = WireFrame {
        message: envelope.payload,
        transfer: envelope
            .transferables
            .iter()
            .map(|buffer| Base64Standard.encode(buffer.as_bytes()))
            .collect(),
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Decodes a text frame into an envelope.
fn decode_frame(text: &str) -> Result<Envelope> {
    let frame: WireFrame = serde_json::from_str(text)?;

    let transferables = frame
        .transfer
        .iter()
        .map(|encoded| {
            Base64Standard
                .decode(encoded)
                .map(Transferable::new)
                .map_err(|e| Error::protocol(format!("invalid transferable: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Envelope::new(frame.message, transferables))
}

// ============================================================================
// websocket
// ============================================================================

/// Wraps an established WebSocket stream in a [`Transport`].
///
/// Spawns the event loop task internally.
pub fn websocket<S>(ws_stream: WebSocketStream<S>) -> Transport
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    tokio::spawn(run_event_loop(ws_stream, outbound_rx, inbound_tx));

    Transport::new(Arc::new(QueueSink::new(outbound_tx)), inbound_rx)
}

/// Event loop that handles WebSocket I/O.
async fn run_event_loop<S>(
    ws_stream: WebSocketStream<S>,
    mut outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    inbound_tx: mpsc::UnboundedSender<Envelope>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            // Incoming frames from the remote context
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                        Ok(envelope) => {
                            if inbound_tx.send(envelope).is_err() {
                                trace!("Inbound receiver dropped, discarding frame");
                            }
                        }
                        Err(e) => warn!(error = %e, "Discarding undecodable frame"),
                    },

                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket closed by remote");
                        break;
                    }

                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break;
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }

                    // Ignore Binary, Ping, Pong
                    _ => {}
                }
            }

            // Envelopes posted through the sink
            envelope = outbound_rx.recv() => {
                match envelope {
                    Some(envelope) => {
                        let text = match encode_frame(envelope) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "Failed to encode envelope");
                                continue;
                            }
                        };

                        if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                            warn!(error = %e, "Failed to write frame");
                            break;
                        }
                    }

                    None => {
                        debug!("Sink closed, closing WebSocket");
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
        }
    }

    debug!("WebSocket event loop terminated");
}

// ============================================================================
// Tests
// ============================================================================
