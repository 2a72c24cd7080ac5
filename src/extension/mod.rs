//! Extension metadata and loaded mods.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `manifest` | `ExtensionManifest` and `SemVer` |
//! | `mods` | `ModView` and `ModRegistry` |

// ============================================================================
// Submodules
// ============================================================================

/// Manifest loading and validation.
pub mod manifest;

/// Loaded mod views.
pub mod mods;

// ============================================================================
// Re-exports
// ============================================================================

pub use manifest::{ExtensionManifest, MAX_VERSION_LENGTH, SemVer, Stage};
pub use mods::{ModDeclaration, ModRegistry, ModView};
