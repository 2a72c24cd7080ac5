//! Capability-scoped permission model.
//!
//! Every privileged daemon handler asks the [`PermissionRegistry`] before it
//! does anything. Absence of a grant denies; there is no implicit default.
//!
//! # Flow
//!
//! ```text
//! manifest permissions ──clean_grants──► grants ──HostPolicy::apply──► PermissionRegistry
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `capability` | Capability vocabulary |
//! | `clean` | Manifest cleaning and origin checks |
//! | `grant` | Manifest entries and typed grants |
//! | `policy` | Host policy intersection |
//! | `registry` | Grant set and the per-extension registry |

// ============================================================================
// Submodules
// ============================================================================

/// Capability vocabulary.
pub mod capability;

/// Manifest cleaning.
pub mod clean;

/// Manifest entries and typed grants.
pub mod grant;

/// Host policy.
pub mod policy;

/// Per-extension registry.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use capability::{ALLOW_ALL, Capability, CapabilityKey, Permission};
pub use clean::{clean_grants, is_dangerous_origin};
pub use grant::{Grant, ManifestPermission};
pub use policy::HostPolicy;
pub use registry::{GrantSet, PermissionRegistry};
