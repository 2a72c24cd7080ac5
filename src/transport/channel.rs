//! In-process transport pair.
//!
//! Models the page ↔ sandboxed frame channel when both ends live in the same
//! process: each end's sink feeds the other end's inbound queue.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use super::{QueueSink, Transport};

// ============================================================================
// pair
// ============================================================================

/// Creates two connected transport ends.
///
/// Dropping or closing one end ends the other end's inbound stream.
#[must_use]
pub fn pair() -> (Transport, Transport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    trace!("In-process transport pair created");

    let a = Transport::new(Arc::new(QueueSink::new(b_tx)), a_rx);
    let b = Transport::new(Arc::new(QueueSink::new(a_tx)), b_rx);
    (a, b)
}

// ============================================================================
// Tests
// ============================================================================
