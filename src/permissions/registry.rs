//! Effective grant set of one loaded extension.
//!
//! The registry is read on every privileged call and written only by the
//! daemon when the `embedExtensions` scope is reconfigured. Writes swap the
//! whole [`GrantSet`] behind an `Arc`, so a reader sees either the old set
//! or the new one, never a mix.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::capability::{ALLOW_ALL, Capability, CapabilityKey, Permission};
use super::clean::clean_grants;
use super::grant::{Grant, ManifestPermission};
use super::policy::HostPolicy;

// ============================================================================
// GrantSet
// ============================================================================

/// Immutable set of grants with fast lookup.
#[derive(Debug, Clone, Default)]
pub struct GrantSet {
    /// Grants in order.
    grants: Vec<Grant>,
    /// Bare capabilities.
    flags: FxHashSet<Capability>,
    /// Values per keyed capability.
    keyed: FxHashMap<CapabilityKey, FxHashSet<String>>,
}

impl GrantSet {
    /// Indexes `grants`.
    ///
    /// A bare `allowAll` also grants `[allowAll]` for every keyed capability
    /// the list does not mention, so keyed scopes stay replaceable.
    #[must_use]
    pub fn new(grants: Vec<Grant>) -> Self {
        Self::index(expand_allow_all(grants))
    }

    fn index(grants: Vec<Grant>) -> Self {
        let mut flags = FxHashSet::default();
        let mut keyed: FxHashMap<CapabilityKey, FxHashSet<String>> = FxHashMap::default();

        for grant in &grants {
            match grant {
                Grant::Flag(capability) => {
                    flags.insert(*capability);
                }
                Grant::Keyed { key, values } => {
                    keyed.entry(*key).or_default().extend(values.iter().cloned());
                }
            }
        }

        Self {
            grants,
            flags,
            keyed,
        }
    }

    /// Decides whether `permission` (with `value` for keyed capabilities) is granted.
    ///
    /// - A bare capability needs its tag or bare `allowAll`.
    /// - A keyed capability needs its key, and a value set holding either
    ///   `allowAll` or `value`.
    ///
    /// Anything else is denied.
    #[must_use]
    pub fn is_allowed(&self, permission: impl Into<Permission>, value: Option<&str>) -> bool {
        match permission.into() {
            Permission::Flag(capability) => {
                self.flags.contains(&capability) || self.flags.contains(&Capability::AllowAll)
            }
            Permission::Keyed(key) => self.keyed.get(&key).is_some_and(|values| {
                values.contains(ALLOW_ALL) || value.is_some_and(|v| values.contains(v))
            }),
        }
    }

    /// Returns the grants in order.
    #[inline]
    #[must_use]
    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }

    /// Returns the granted values for `key`.
    #[inline]
    #[must_use]
    pub fn values(&self, key: CapabilityKey) -> Option<&FxHashSet<String>> {
        self.keyed.get(&key)
    }

    /// Returns `true` if the bare capability is present.
    #[inline]
    #[must_use]
    pub fn has_flag(&self, capability: Capability) -> bool {
        self.flags.contains(&capability)
    }

    /// Returns `true` for grants the UI should warn about.
    #[must_use]
    pub fn has_unsafe_permissions(&self) -> bool {
        self.flags.contains(&Capability::AllowAll)
            || self
                .keyed
                .get(&CapabilityKey::EmbedExtensions)
                .is_some_and(|values| !values.is_empty())
            || self
                .keyed
                .get(&CapabilityKey::WebRequest)
                .is_some_and(|values| values.contains(ALLOW_ALL))
    }

    /// Returns a copy with `key`'s values replaced. Empty `values` removes the key.
    #[must_use]
    pub fn with_values(&self, key: CapabilityKey, values: Vec<String>) -> Self {
        let mut grants: Vec<Grant> = self
            .grants
            .iter()
            .filter(|grant| !matches!(grant, Grant::Keyed { key: k, .. } if *k == key))
            .cloned()
            .collect();
        if !values.is_empty() {
            grants.push(Grant::Keyed { key, values });
        }
        Self::index(grants)
    }
}

/// Adds `key:[allowAll]` for each key a bare `allowAll` covers implicitly.
fn expand_allow_all(mut grants: Vec<Grant>) -> Vec<Grant> {
    if !grants.contains(&Grant::Flag(Capability::AllowAll)) {
        return grants;
    }
    for key in CapabilityKey::ALL {
        let mentioned = grants
            .iter()
            .any(|grant| matches!(grant, Grant::Keyed { key: k, .. } if *k == key));
        if !mentioned {
            grants.push(Grant::allow_all(key));
        }
    }
    grants
}

// ============================================================================
// PermissionRegistry
// ============================================================================

/// Effective permissions of one extension load.
#[derive(Debug)]
pub struct PermissionRegistry {
    /// Current grant set, swapped atomically.
    current: RwLock<Arc<GrantSet>>,
    /// Whether the load-time grant had `embedExtensions:allowAll`.
    embed_all_at_load: bool,
    /// Whether the embed scope was already configured.
    configured: AtomicBool,
}

impl PermissionRegistry {
    /// Builds the registry from manifest permissions intersected with host policy.
    #[must_use]
    pub fn new(requested: &[ManifestPermission], policy: &HostPolicy) -> Self {
        Self::from_grants(policy.apply(clean_grants(requested)))
    }

    /// Builds the registry from already-clean grants.
    #[must_use]
    pub fn from_grants(grants: Vec<Grant>) -> Self {
        let set = GrantSet::new(grants);
        let embed_all_at_load = set
            .values(CapabilityKey::EmbedExtensions)
            .is_some_and(|values| values.contains(ALLOW_ALL));

        debug!(grants = set.grants().len(), "Permission registry built");

        Self {
            current: RwLock::new(Arc::new(set)),
            embed_all_at_load,
            configured: AtomicBool::new(false),
        }
    }

    /// Marks the embed scope as already configured in an earlier session.
    #[must_use]
    pub fn with_configured(self, configured: bool) -> Self {
        self.configured.store(configured, Ordering::Release);
        self
    }

    /// See [`GrantSet::is_allowed`].
    #[inline]
    #[must_use]
    pub fn is_allowed(&self, permission: impl Into<Permission>, value: Option<&str>) -> bool {
        self.current.read().is_allowed(permission, value)
    }

    /// Like [`is_allowed`](Self::is_allowed) but returns an error naming the capability.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] when not granted.
    pub fn check(&self, permission: impl Into<Permission>, value: Option<&str>) -> Result<()> {
        let permission = permission.into();
        if self.is_allowed(permission, value) {
            return Ok(());
        }
        Err(Error::permission_denied(match value {
            Some(value) => format!("{permission}:{value}"),
            None => permission.to_string(),
        }))
    }

    /// Returns the current grant set.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> Arc<GrantSet> {
        Arc::clone(&self.current.read())
    }

    /// Returns `true` once the embed scope was configured.
    #[inline]
    #[must_use]
    pub fn configured(&self) -> bool {
        self.configured.load(Ordering::Acquire)
    }

    /// See [`GrantSet::has_unsafe_permissions`].
    #[inline]
    #[must_use]
    pub fn has_unsafe_permissions(&self) -> bool {
        self.current.read().has_unsafe_permissions()
    }

    /// Returns `true` if the extension may still narrow its own embed scope once.
    #[must_use]
    pub fn can_self_reconfigure(&self) -> bool {
        self.embed_all_at_load && !self.configured()
    }

    /// Replaces the `embedExtensions` scope.
    ///
    /// Daemon-only; the extension never reaches this directly.
    pub(crate) fn reconfigure(&self, canonical_urls: Vec<String>) {
        let urls = dedupe_urls(canonical_urls);
        let count = urls.len();
        {
            let mut current = self.current.write();
            let next = current.with_values(CapabilityKey::EmbedExtensions, urls);
            *current = Arc::new(next);
        }
        self.configured.store(true, Ordering::Release);
        info!(urls = count, "Embed scope reconfigured");
    }

    /// One-shot narrowing requested by the extension itself.
    ///
    /// Honored only when the load-time grant was `embedExtensions:allowAll`
    /// and nothing was configured yet. Returns `true` if applied.
    pub(crate) fn try_self_reconfigure(&self, canonical_urls: Vec<String>) -> bool {
        if !self.embed_all_at_load {
            return false;
        }
        if self
            .configured
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.reconfigure(canonical_urls);
        true
    }
}

/// Drops empty and duplicate URLs, keeping first-seen order.
fn dedupe_urls(urls: Vec<String>) -> Vec<String> {
    let mut seen = FxHashSet::default();
    urls.into_iter()
        .filter(|url| !url.is_empty() && seen.insert(url.clone()))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn embed(urls: &[&str]) -> PermissionRegistry {
        PermissionRegistry::from_grants(vec![Grant::keyed(
            CapabilityKey::EmbedExtensions,
            urls.iter().copied(),
        )])
    }

    #[test]
    fn test_bare_capability() {
        let set = GrantSet::new(vec![Grant::Flag(Capability::FullScreen)]);
        assert!(set.is_allowed(Capability::FullScreen, None));
        assert!(!set.is_allowed(Capability::Camera, None));
    }

    #[test]
    fn test_keyed_capability() {
        let set = GrantSet::new(vec![Grant::keyed(CapabilityKey::GameSaves, ["read"])]);
        assert!(set.is_allowed(CapabilityKey::GameSaves, Some("read")));
        assert!(!set.is_allowed(CapabilityKey::GameSaves, Some("write")));
        assert!(!set.is_allowed(CapabilityKey::GameSaves, None));
        assert!(!set.is_allowed(CapabilityKey::Files, Some("read")));
    }

    #[test]
    fn test_keyed_allow_all() {
        let set = GrantSet::new(vec![Grant::allow_all(CapabilityKey::WebRequest)]);
        assert!(set.is_allowed(CapabilityKey::WebRequest, Some("https://any.example")));
        assert!(set.is_allowed(CapabilityKey::WebRequest, None));
    }

    #[test]
    fn test_empty_set_denies() {
        let set = GrantSet::default();
        assert!(!set.is_allowed(Capability::FullScreen, None));
        assert!(!set.is_allowed(CapabilityKey::Files, Some("read")));
    }

    #[test]
    fn test_check_names_capability() {
        let registry = PermissionRegistry::from_grants(Vec::new());
        let err = registry
            .check(CapabilityKey::GameSaves, Some("write"))
            .unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(err.to_string(), "Permission denied: gameSaves:write");
    }

    #[test]
    fn test_reconfiguration_widens_scope_for_later_calls() {
        let registry = embed(&["a.example"]);

        let before = registry.is_allowed(CapabilityKey::EmbedExtensions, Some("b.example"));
        assert!(!before);

        registry.reconfigure(vec!["b.example".into()]);

        assert!(registry.is_allowed(CapabilityKey::EmbedExtensions, Some("b.example")));
        assert!(!registry.is_allowed(CapabilityKey::EmbedExtensions, Some("a.example")));
        // The earlier answer is a plain value and stays as it was.
        assert!(!before);
        assert!(registry.configured());
    }

    #[test]
    fn test_snapshot_is_not_affected_by_swap() {
        let registry = embed(&["a.example"]);
        let old = registry.snapshot();

        registry.reconfigure(vec!["b.example".into()]);

        assert!(old.is_allowed(CapabilityKey::EmbedExtensions, Some("a.example")));
        assert!(!old.is_allowed(CapabilityKey::EmbedExtensions, Some("b.example")));
    }

    #[test]
    fn test_self_reconfigure_is_one_shot_from_allow_all() {
        let registry = embed(&[ALLOW_ALL]);
        assert!(registry.has_unsafe_permissions());
        assert!(registry.can_self_reconfigure());

        assert!(registry.try_self_reconfigure(vec!["a.example".into(), "a.example".into()]));
        assert!(registry.is_allowed(CapabilityKey::EmbedExtensions, Some("a.example")));
        assert!(!registry.is_allowed(CapabilityKey::EmbedExtensions, Some("c.example")));

        assert!(!registry.try_self_reconfigure(vec!["c.example".into()]));
        assert!(!registry.is_allowed(CapabilityKey::EmbedExtensions, Some("c.example")));
    }

    #[test]
    fn test_self_reconfigure_refused_without_allow_all() {
        let registry = embed(&["a.example"]);
        assert!(!registry.can_self_reconfigure());
        assert!(!registry.try_self_reconfigure(vec!["b.example".into()]));
    }

    #[test]
    fn test_self_reconfigure_refused_when_already_configured() {
        let registry = embed(&[ALLOW_ALL]).with_configured(true);
        assert!(!registry.try_self_reconfigure(vec!["b.example".into()]));
    }

    #[test]
    fn test_bare_allow_all_expands_to_keyed_scopes() {
        let set = GrantSet::new(vec![Grant::Flag(Capability::AllowAll)]);
        assert!(set.is_allowed(Capability::Camera, None));
        for key in CapabilityKey::ALL {
            assert!(set.values(key).is_some_and(|values| values.contains(ALLOW_ALL)));
        }
    }

    #[test]
    fn test_bare_allow_all_embed_scope_is_replaceable() {
        let registry = PermissionRegistry::new(
            &[ManifestPermission::tag("allowAll")],
            &HostPolicy::permissive(),
        );
        assert!(registry.can_self_reconfigure());
        assert!(registry.is_allowed(CapabilityKey::EmbedExtensions, Some("c.example")));

        registry.reconfigure(vec!["b.example".into()]);

        assert!(registry.is_allowed(CapabilityKey::EmbedExtensions, Some("b.example")));
        assert!(!registry.is_allowed(CapabilityKey::EmbedExtensions, Some("c.example")));
        assert!(registry.is_allowed(CapabilityKey::WebRequest, Some("https://any.example")));
        assert!(registry.is_allowed(Capability::FullScreen, None));
    }

    #[test]
    fn test_bare_allow_all_embed_scope_can_be_emptied() {
        let registry = PermissionRegistry::from_grants(vec![Grant::Flag(Capability::AllowAll)]);
        registry.reconfigure(Vec::new());
        assert!(!registry.is_allowed(CapabilityKey::EmbedExtensions, Some("c.example")));
    }

    #[test]
    fn test_reconfigure_to_nothing_removes_key() {
        let registry = embed(&["a.example"]);
        registry.reconfigure(Vec::new());
        assert!(registry.snapshot().values(CapabilityKey::EmbedExtensions).is_none());
    }

    #[test]
    fn test_registry_from_manifest_and_policy() {
        let requested = vec![
            ManifestPermission::tag("camera"),
            ManifestPermission::keyed("gameSaves", ["read", "write"]),
        ];
        let policy = HostPolicy::permissive().deny(Capability::Camera);
        let registry = PermissionRegistry::new(&requested, &policy);

        assert!(!registry.is_allowed(Capability::Camera, None));
        assert!(registry.is_allowed(CapabilityKey::GameSaves, Some("write")));
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    /// Straight-line reading of the grant rules, used as the oracle.
    fn oracle(grants: &[Grant], permission: Permission, value: Option<&str>) -> bool {
        let allow_all = grants.contains(&Grant::Flag(Capability::AllowAll));
        match permission {
            Permission::Flag(requested) => {
                allow_all || grants.contains(&Grant::Flag(requested))
            }
            Permission::Keyed(requested) => {
                let scoped: Vec<&Vec<String>> = grants
                    .iter()
                    .filter_map(|grant| match grant {
                        Grant::Keyed { key, values } if *key == requested => Some(values),
                        _ => None,
                    })
                    .collect();
                if scoped.is_empty() {
                    return allow_all;
                }
                scoped.iter().any(|values| {
                    values
                        .iter()
                        .any(|v| v == ALLOW_ALL || Some(v.as_str()) == value)
                })
            }
        }
    }

    fn capability() -> impl Strategy<Value = Capability> {
        prop::sample::select(Capability::ALL.to_vec())
    }

    fn key() -> impl Strategy<Value = CapabilityKey> {
        prop::sample::select(CapabilityKey::ALL.to_vec())
    }

    fn value() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["read", "write", "a.example", "b.example", ALLOW_ALL])
            .prop_map(String::from)
    }

    fn grant() -> impl Strategy<Value = Grant> {
        prop_oneof![
            capability().prop_map(Grant::Flag),
            (key(), prop::collection::vec(value(), 0..4))
                .prop_map(|(key, values)| Grant::Keyed { key, values }),
        ]
    }

    fn permission() -> impl Strategy<Value = Permission> {
        prop_oneof![
            capability().prop_map(Permission::Flag),
            key().prop_map(Permission::Keyed),
        ]
    }

    proptest! {
        #[test]
        fn prop_is_allowed_matches_rules(
            grants in prop::collection::vec(grant(), 0..6),
            requested in permission(),
            requested_value in prop::option::of(value()),
        ) {
            let set = GrantSet::new(grants.clone());
            prop_assert_eq!(
                set.is_allowed(requested, requested_value.as_deref()),
                oracle(&grants, requested, requested_value.as_deref())
            );
        }

        #[test]
        fn prop_absent_key_denies(
            flags in prop::collection::vec(capability(), 0..6),
            requested in key(),
            requested_value in prop::option::of(value()),
        ) {
            prop_assume!(!flags.contains(&Capability::AllowAll));
            let set = GrantSet::new(flags.into_iter().map(Grant::Flag).collect());
            prop_assert!(!set.is_allowed(requested, requested_value.as_deref()));
        }
    }
}
