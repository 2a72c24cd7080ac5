//! Permission grants as declared by a manifest and as enforced.
//!
//! A manifest lists [`ManifestPermission`] entries, which are untrusted and
//! may name anything. Cleaning turns them into typed [`Grant`]s.
//!
//! Accepted manifest forms:
//!
//! ```json
//! "fullScreen"
//! "files:read"
//! { "key": "gameSaves", "value": ["read", "write"] }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use super::capability::{ALLOW_ALL, Capability, CapabilityKey};

// ============================================================================
// ManifestPermission
// ============================================================================

/// One permission entry exactly as the manifest declares it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PermissionRepr")]
pub struct ManifestPermission {
    /// Capability tag or key.
    pub key: String,
    /// Requested values; empty for bare tags.
    #[serde(default)]
    pub value: Vec<String>,
}

impl ManifestPermission {
    /// Bare tag entry.
    #[must_use]
    pub fn tag(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
        }
    }

    /// Keyed entry.
    #[must_use]
    pub fn keyed<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            value: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Wire forms a manifest entry may take.
#[derive(Deserialize)]
#[serde(untagged)]
enum PermissionRepr {
    Tag(String),
    Keyed {
        key: String,
        #[serde(default)]
        value: Vec<String>,
    },
}

impl From<PermissionRepr> for ManifestPermission {
    fn from(repr: PermissionRepr) -> Self {
        match repr {
            PermissionRepr::Tag(tag) => match tag.split_once(':') {
                Some((key, value)) => Self::keyed(key, value.split(',').filter(|v| !v.is_empty())),
                None => Self::tag(tag),
            },
            PermissionRepr::Keyed { key, value } => Self { key, value },
        }
    }
}

// ============================================================================
// Grant
// ============================================================================

/// One enforced grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Grant {
    /// A bare capability.
    Flag(Capability),
    /// A keyed capability with its granted values.
    Keyed {
        /// Capability key.
        key: CapabilityKey,
        /// Granted values, deduplicated. `[allowAll]` grants every value.
        values: Vec<String>,
    },
}

impl Grant {
    /// Keyed grant.
    #[must_use]
    pub fn keyed<I, S>(key: CapabilityKey, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Keyed {
            key,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Keyed grant covering every value.
    #[must_use]
    pub fn allow_all(key: CapabilityKey) -> Self {
        Self::keyed(key, [ALLOW_ALL])
    }

    /// Returns `true` for a keyed grant whose values include `allowAll`.
    #[must_use]
    pub fn is_allow_all(&self) -> bool {
        match self {
            Self::Flag(capability) => *capability == Capability::AllowAll,
            Self::Keyed { values, .. } => values.iter().any(|v| v == ALLOW_ALL),
        }
    }

    /// Converts back into manifest form.
    #[must_use]
    pub fn to_manifest(&self) -> ManifestPermission {
        match self {
            Self::Flag(capability) => ManifestPermission::tag(capability.as_str()),
            Self::Keyed { key, values } => ManifestPermission::keyed(key.as_str(), values.clone()),
        }
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(capability) => capability.fmt(f),
            Self::Keyed { key, values } => write!(f, "{key}:{}", values.join(",")),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
