//! Type-safe identifiers for host entities.
//!
//! Newtype wrappers keep request, extension, save and mod IDs from being
//! mixed up at compile time.
//!
//! | Type | Backing | Scope |
//! |------|---------|-------|
//! | [`RequestId`] | `u64` | Unique per bridge, monotonically increasing |
//! | [`ExtensionId`] | UUID v4 | One loaded extension instance |
//! | [`SaveId`] | `u64` | Host-assigned save record |
//! | [`ModId`] | `u64` | One registered mod view |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// RequestId
// ============================================================================

/// Correlation ID for one RPC call on one bridge.
///
/// Allocated by [`RequestCounter`]; never reused on the same bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Wraps a raw request ID.
    #[inline]
    #[must_use]
    pub const fn from_u64(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic request ID allocator owned by a single bridge.
#[derive(Debug, Default)]
pub struct RequestCounter(AtomicU64);

impl RequestCounter {
    /// Creates a counter starting at zero.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Allocates the next ID.
    #[inline]
    pub fn next(&self) -> RequestId {
        RequestId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// ExtensionId
// ============================================================================

/// Identity of one loaded extension instance.
///
/// A reload of the same manifest gets a fresh ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtensionId(Uuid);

impl ExtensionId {
    /// Generates a new random ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SaveId
// ============================================================================

/// Host-assigned save record ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaveId(u64);

impl SaveId {
    /// Wraps a raw save ID.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Converts a wire value. Negative values have no save ID.
    #[inline]
    #[must_use]
    pub fn from_i64(id: i64) -> Option<Self> {
        u64::try_from(id).ok().map(Self)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ModId
// ============================================================================

/// Global counter for mod view IDs.
static NEXT_MOD_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one registered mod view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModId(u64);

impl ModId {
    /// Allocates the next mod ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_MOD_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mod-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
