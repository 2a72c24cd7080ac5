//! Wire protocol between a host and an isolated extension context.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Either way | Call a method declared by the other side |
//! | `Response` | Either way | Result or error for one request `id` |
//!
//! Both sides may call each other at the same time over the same transport;
//! responses are matched to calls by `id` alone.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | `Message` union, `Response`, error codes |
//! | `method` | Typed daemon method table |
//! | `payload` | Payloads, transferables, handshake shapes |

// ============================================================================
// Submodules
// ============================================================================

/// Wire message union and error codes.
pub mod message;

/// Typed daemon method table.
pub mod method;

/// Payloads, transferables and handshake data.
pub mod payload;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{ErrorCode, Message, Request, Response, RpcFault, Salvaged, salvage_id};
pub use method::DaemonMethod;
pub use payload::{
    FatalErrorConfig, FileTransfer, InitialExtensionState, Payload, ReconfigurationConfig,
    Transferable,
};
