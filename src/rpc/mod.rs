//! wRpc: typed request/response calls across an isolation boundary.
//!
//! Both ends of a [`Transport`](crate::transport::Transport) run a
//! [`Bridge`]. Each bridge answers the methods its own [`MethodTable`]
//! declares and lets local code call the remote side's methods.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `bridge` | Call multiplexer and event loop |
//! | `client` | Typed client for the daemon methods |
//! | `table` | Local method tables |

// ============================================================================
// Submodules
// ============================================================================

/// Call multiplexer and event loop.
pub mod bridge;

/// Typed client for the daemon methods.
pub mod client;

/// Local method tables.
pub mod table;

// ============================================================================
// Re-exports
// ============================================================================

pub use bridge::{Bridge, CloseReason, MAX_PENDING_CALLS};
pub use client::DaemonClient;
pub use table::{HandlerFuture, HandlerTable, MethodTable};
