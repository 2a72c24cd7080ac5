//! Extension lifecycle: controllers, daemon handlers and the host registry.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `state` | [`ControllerState`] machine and legal transitions |
//! | `options` | [`ControllerOptions`] timing and handshake settings |
//! | `ui` | [`EmbeddingUi`] hooks into the embedding page |
//! | `controller` | [`ExtensionController`] for one extension |
//! | `daemon` | Permission-checked handlers for daemon methods |
//! | `manager` | [`ExtensionHost`] tracking every running extension |
//! | `builder` | [`HostBuilder`] fluent configuration |
//!
//! # Lifecycle
//!
//! ```text
//! host.launch(manifest)
//!   ├─ Created ─► ContextLoading          launcher creates the context
//!   ├─ secureContextEstablished ─► HandshakeInProgress
//!   ├─ getInitialState                     answered once
//!   ├─ readyForDisplay ─► Ready ─► Running frame shown
//!   └─ exit / signalFatalError ─► Terminated / FatalError
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent host configuration.
pub mod builder;

/// Controller for one extension.
pub mod controller;

/// Daemon method handlers.
mod daemon;

/// Registry of running extensions.
pub mod manager;

/// Controller options.
pub mod options;

/// Controller state machine.
pub mod state;

/// Embedding page hooks.
pub mod ui;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::HostBuilder;
pub use controller::{ControllerServices, ExtensionController, FATAL_ERROR_MESSAGE};
pub use manager::ExtensionHost;
pub use options::{
    ControllerOptions, DEFAULT_EXIT_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_SHUTDOWN_GRACE,
};
pub use state::ControllerState;
pub use ui::{EmbeddingUi, HeadlessUi};
