//! Extension Host - capability-scoped RPC and lifecycle for sandboxed extensions.
//!
//! This library hosts untrusted extensions in isolated contexts and lets
//! them reach host functionality only through a typed, permission-checked
//! RPC bridge.
//!
//! # Architecture
//!
//! The host follows a daemon/extension model:
//!
//! - **Daemon (host side)**: Owns the permission registry and answers RPC
//! - **Extension (sandboxed side)**: Calls daemon methods through a [`DaemonClient`]
//!
//! Key design principles:
//!
//! - Each [`ExtensionController`] owns: one context + one [`Bridge`] + one state machine
//! - Wire messages are a closed `request`/`response` union validated on receipt
//! - Permissions are computed once per load and consulted by every privileged handler
//! - Denials and faults travel back as data; the bridge loop never unwinds
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use extension_host::{ExtensionHost, ExtensionManifest, InProcessLauncher, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let launcher = Arc::new(InProcessLauncher::new(|request, transport| async move {
//!         // Run the extension against `transport`.
//!     }));
//!
//!     let host = ExtensionHost::builder().launcher(launcher).build()?;
//!     let manifest = ExtensionManifest::from_path("game/manifest.json")?;
//!     let game = host.launch(manifest).await?;
//!
//!     host.exit(game.id()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire messages, error codes, daemon methods |
//! | [`transport`] | In-process and WebSocket channels |
//! | [`rpc`] | wRpc [`Bridge`] and typed [`DaemonClient`] |
//! | [`permissions`] | Capabilities, grants and [`PermissionRegistry`] |
//! | [`sandbox`] | CSP and iframe policy, context launchers |
//! | [`extension`] | Manifests, versions and mod views |
//! | [`providers`] | Save and file collaborators |
//! | [`host`] | Controllers, daemon handlers and [`ExtensionHost`] |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Wire protocol types.
pub mod protocol;

/// Message channels between contexts.
pub mod transport;

/// Typed request/response layer over a transport.
pub mod rpc;

/// Capability vocabulary and per-load grants.
pub mod permissions;

/// Sandbox policy and context launchers.
pub mod sandbox;

/// Extension manifests and mods.
pub mod extension;

/// External save and file collaborators.
pub mod providers;

/// Extension lifecycle.
///
/// Use [`ExtensionHost::builder()`] to create a configured host.
pub mod host;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ExtensionId, ModId, RequestId, SaveId};

// Protocol types
pub use protocol::{DaemonMethod, ErrorCode, InitialExtensionState, Payload, RpcFault};

// Transport types
pub use transport::Transport;

// RPC types
pub use rpc::{Bridge, DaemonClient, HandlerTable, MethodTable};

// Permission types
pub use permissions::{Capability, CapabilityKey, HostPolicy, PermissionRegistry};

// Sandbox types
pub use sandbox::{ContextLauncher, InProcessLauncher, SandboxPolicy, SocketLauncher};

// Extension types
pub use extension::{ExtensionManifest, ModRegistry, ModView, SemVer};

// Provider types
pub use providers::{FileProvider, MemoryFileCache, MemorySaveStore, SaveProvider, SaveRecord};

// Host types
pub use host::{
    ControllerOptions, ControllerState, EmbeddingUi, ExtensionController, ExtensionHost,
    HostBuilder,
};
