//! Host-side limits on what an extension may be granted.
//!
//! The effective grant set of an extension is the intersection of its
//! cleaned manifest grants with the host policy. A host may refuse a
//! permission the manifest declares; it never adds one.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::capability::{ALLOW_ALL, Capability, CapabilityKey};
use super::grant::Grant;

// ============================================================================
// HostPolicy
// ============================================================================

/// Capabilities the host is willing to grant.
///
/// # Example
///
/// ```ignore
/// let policy = HostPolicy::permissive()
///     .deny(Capability::Camera)
///     .restrict_values(CapabilityKey::GameSaves, ["read"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct HostPolicy {
    /// Bare capabilities never granted.
    denied: FxHashSet<Capability>,
    /// Keys never granted.
    denied_keys: FxHashSet<CapabilityKey>,
    /// Upper bound on values per key.
    allowed_values: FxHashMap<CapabilityKey, Vec<String>>,
}

impl HostPolicy {
    /// Grants whatever the manifest asks for.
    #[must_use]
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Refuses `allowAll`, unsafe content and hardware access, embedding and network.
    #[must_use]
    pub fn restrictive() -> Self {
        Self::permissive()
            .deny(Capability::AllowAll)
            .deny(Capability::AllowUnsafeEval)
            .deny(Capability::AllowInlineContent)
            .deny(Capability::Camera)
            .deny(Capability::Microphone)
            .deny(Capability::GeoLocation)
            .deny(Capability::DisplayCapture)
            .deny_key(CapabilityKey::EmbedExtensions)
            .deny_key(CapabilityKey::WebRequest)
    }

    /// Never grant `capability`.
    #[must_use]
    pub fn deny(mut self, capability: Capability) -> Self {
        self.denied.insert(capability);
        self
    }

    /// Never grant anything under `key`.
    #[must_use]
    pub fn deny_key(mut self, key: CapabilityKey) -> Self {
        self.denied_keys.insert(key);
        self
    }

    /// Grant at most `values` under `key`.
    #[must_use]
    pub fn restrict_values<I, S>(mut self, key: CapabilityKey, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values
            .insert(key, values.into_iter().map(Into::into).collect());
        self
    }

    /// Returns `true` if the policy refuses `capability` outright.
    #[inline]
    #[must_use]
    pub fn is_denied(&self, capability: Capability) -> bool {
        self.denied.contains(&capability)
    }

    /// Intersects cleaned grants with this policy.
    ///
    /// A refused `allowAll` tag is expanded into its parts first, so the
    /// extension still gets everything else the policy allows.
    #[must_use]
    pub fn apply(&self, grants: Vec<Grant>) -> Vec<Grant> {
        let expanded: Vec<Grant> = if grants.contains(&Grant::Flag(Capability::AllowAll))
            && self.is_denied(Capability::AllowAll)
        {
            debug!("Host policy refuses allowAll, expanding");
            Capability::ALL
                .into_iter()
                .filter(|c| *c != Capability::AllowAll)
                .map(Grant::Flag)
                .chain(CapabilityKey::ALL.into_iter().map(Grant::allow_all))
                .collect()
        } else {
            grants
        };

        expanded
            .into_iter()
            .filter_map(|grant| self.intersect(grant))
            .collect()
    }

    /// Intersects one grant, returning `None` if nothing is left.
    fn intersect(&self, grant: Grant) -> Option<Grant> {
        match grant {
            Grant::Flag(capability) if self.denied.contains(&capability) => {
                debug!(%capability, "Host policy refuses capability");
                None
            }
            Grant::Flag(capability) => Some(Grant::Flag(capability)),
            Grant::Keyed { key, .. } if self.denied_keys.contains(&key) => {
                debug!(%key, "Host policy refuses capability key");
                None
            }
            Grant::Keyed { key, values } => {
                let Some(allowed) = self.allowed_values.get(&key) else {
                    return Some(Grant::Keyed { key, values });
                };

                let values: Vec<String> = if values.iter().any(|v| v == ALLOW_ALL) {
                    allowed.clone()
                } else {
                    values
                        .into_iter()
                        .filter(|v| allowed.iter().any(|a| a == v || a == ALLOW_ALL))
                        .collect()
                };

                if values.is_empty() {
                    debug!(%key, "Host policy leaves no values");
                    None
                } else {
                    Some(Grant::Keyed { key, values })
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissive_keeps_everything() {
        let grants = vec![
            Grant::Flag(Capability::Camera),
            Grant::keyed(CapabilityKey::GameSaves, ["read", "write"]),
        ];
        assert_eq!(HostPolicy::permissive().apply(grants.clone()), grants);
    }

    #[test]
    fn test_denied_capability_removed() {
        let policy = HostPolicy::permissive().deny(Capability::Camera);
        let grants = policy.apply(vec![
            Grant::Flag(Capability::Camera),
            Grant::Flag(Capability::FullScreen),
        ]);
        assert_eq!(grants, vec![Grant::Flag(Capability::FullScreen)]);
    }

    #[test]
    fn test_value_restriction() {
        let policy = HostPolicy::permissive().restrict_values(CapabilityKey::GameSaves, ["read"]);
        let grants = policy.apply(vec![Grant::keyed(CapabilityKey::GameSaves, ["read", "write"])]);
        assert_eq!(grants, vec![Grant::keyed(CapabilityKey::GameSaves, ["read"])]);

        let grants = policy.apply(vec![Grant::keyed(CapabilityKey::GameSaves, ["write"])]);
        assert!(grants.is_empty());
    }

    #[test]
    fn test_allow_all_value_is_bounded_by_restriction() {
        let policy = HostPolicy::permissive()
            .restrict_values(CapabilityKey::EmbedExtensions, ["https://a.example/"]);
        let grants = policy.apply(vec![Grant::allow_all(CapabilityKey::EmbedExtensions)]);
        assert_eq!(
            grants,
            vec![Grant::keyed(CapabilityKey::EmbedExtensions, ["https://a.example/"])]
        );
    }

    #[test]
    fn test_restrictive_expands_allow_all() {
        let grants = HostPolicy::restrictive().apply(vec![Grant::Flag(Capability::AllowAll)]);

        assert!(!grants.contains(&Grant::Flag(Capability::AllowAll)));
        assert!(!grants.contains(&Grant::Flag(Capability::Camera)));
        assert!(grants.contains(&Grant::Flag(Capability::FullScreen)));
        assert!(grants.contains(&Grant::allow_all(CapabilityKey::GameSaves)));
        assert!(
            !grants
                .iter()
                .any(|g| matches!(g, Grant::Keyed { key: CapabilityKey::WebRequest, .. }))
        );
    }
}
