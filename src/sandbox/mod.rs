//! Sandboxing contract for extension contexts.
//!
//! An extension runs in a restricted context with no ambient authority. This
//! module derives the browser-level isolation settings from its grants and
//! abstracts how contexts are created and destroyed.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `launcher` | `ContextLauncher` trait and launchers |
//! | `policy` | CSP, frame `allow` / `sandbox` attributes, launch URL |

// ============================================================================
// Submodules
// ============================================================================

/// Context launchers.
pub mod launcher;

/// Isolation policy.
pub mod policy;

// ============================================================================
// Re-exports
// ============================================================================

pub use launcher::{ContextLauncher, InProcessLauncher, SandboxRequest, SocketLauncher};
pub use policy::{CspConfig, SandboxPolicy};
