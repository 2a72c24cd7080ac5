//! Runtime views of loaded mods.
//!
//! The host owns a mod's identity and resolves its resources. The mod owns
//! its `state`. Views live in a [`ModRegistry`] from load until the world is
//! unloaded or the extension exits.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ModId;

// ============================================================================
// ModDeclaration
// ============================================================================

/// What a mod declares about itself when it is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModDeclaration {
    /// Short unique name other mods refer to.
    pub alias: String,
    /// URL the mod is known by.
    pub canonical_url: Url,
    /// URL the files were resolved from.
    pub resolved_url: Url,
    /// Canonical URLs of mods that must be loaded first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Names the mod module exports.
    #[serde(default)]
    pub exports: Vec<String>,
    /// Resource names mapped to paths relative to `resolved_url`.
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
    /// Initial mod state.
    #[serde(default)]
    pub state: Value,
}

// ============================================================================
// ModView
// ============================================================================

/// Host-side handle for one loaded mod.
#[derive(Debug)]
pub struct ModView {
    id: ModId,
    alias: String,
    canonical_url: Url,
    resolved_url: Url,
    dependencies: Vec<String>,
    exports: Vec<String>,
    resources: BTreeMap<String, Url>,
    state: Mutex<Value>,
}

impl ModView {
    #[inline]
    #[must_use]
    pub fn id(&self) -> ModId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    #[inline]
    #[must_use]
    pub fn canonical_url(&self) -> &Url {
        &self.canonical_url
    }

    #[inline]
    #[must_use]
    pub fn resolved_url(&self) -> &Url {
        &self.resolved_url
    }

    /// Canonical URLs this mod requires.
    #[inline]
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Names exported by the original module.
    #[inline]
    #[must_use]
    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    /// Returns the absolute URL of a declared resource.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&Url> {
        self.resources.get(name)
    }

    /// Returns all resolved resources.
    #[inline]
    #[must_use]
    pub fn resources(&self) -> &BTreeMap<String, Url> {
        &self.resources
    }

    /// Returns a copy of the mod's state.
    #[must_use]
    pub fn state(&self) -> Value {
        self.state.lock().clone()
    }

    /// Replaces the mod's state.
    pub fn set_state(&self, state: Value) {
        *self.state.lock() = state;
    }

    /// Mutates the mod's state in place.
    pub fn update_state<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        f(&mut self.state.lock())
    }
}

// ============================================================================
// ModRegistry
// ============================================================================

/// Mods loaded into one extension, in load order.
#[derive(Debug, Default)]
pub struct ModRegistry {
    mods: RwLock<Vec<Arc<ModView>>>,
}

impl ModRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mod after its dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the alias or canonical URL is taken, a
    /// dependency is not loaded yet, or a resource path does not resolve.
    pub fn register(&self, declaration: ModDeclaration) -> Result<Arc<ModView>> {
        let mut mods = self.mods.write();

        if mods.iter().any(|m| m.alias == declaration.alias) {
            return Err(Error::config(format!(
                "mod \"{}\" is already loaded",
                declaration.alias
            )));
        }
        if mods.iter().any(|m| m.canonical_url == declaration.canonical_url) {
            return Err(Error::config(format!(
                "mod at {} is already loaded",
                declaration.canonical_url
            )));
        }
        if let Some(missing) = declaration
            .dependencies
            .iter()
            .find(|dep| !mods.iter().any(|m| is_canonical_url(m, dep)))
        {
            return Err(Error::config(format!(
                "mod \"{}\" depends on \"{missing}\", which is not loaded",
                declaration.alias
            )));
        }

        let resources = declaration
            .resources
            .iter()
            .map(|(name, path)| -> Result<(String, Url)> {
                Ok((name.clone(), declaration.resolved_url.join(path)?))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let view = Arc::new(ModView {
            id: ModId::next(),
            alias: declaration.alias,
            canonical_url: declaration.canonical_url,
            resolved_url: declaration.resolved_url,
            dependencies: declaration.dependencies,
            exports: declaration.exports,
            resources,
            state: Mutex::new(declaration.state),
        });

        debug!(mod_id = %view.id, alias = %view.alias, "Mod registered");
        mods.push(Arc::clone(&view));
        Ok(view)
    }

    /// Looks up a mod by ID.
    #[must_use]
    pub fn get(&self, id: ModId) -> Option<Arc<ModView>> {
        self.mods.read().iter().find(|m| m.id == id).cloned()
    }

    /// Looks up a mod by canonical URL.
    #[must_use]
    pub fn find_by_url(&self, canonical_url: &str) -> Option<Arc<ModView>> {
        self.mods
            .read()
            .iter()
            .find(|m| is_canonical_url(m, canonical_url))
            .cloned()
    }

    /// Looks up a mod by alias.
    #[must_use]
    pub fn find(&self, alias: &str) -> Option<Arc<ModView>> {
        self.mods.read().iter().find(|m| m.alias == alias).cloned()
    }

    /// Returns all mods in load order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<ModView>> {
        self.mods.read().clone()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.mods.read().len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mods.read().is_empty()
    }

    /// Drops every view, last loaded first. Returns how many were unloaded.
    pub fn unload_all(&self) -> usize {
        let mut mods = self.mods.write();
        let count = mods.len();
        while let Some(view) = mods.pop() {
            debug!(mod_id = %view.id, alias = %view.alias, "Mod unloaded");
        }
        if count > 0 {
            info!(count, "Mods unloaded");
        }
        count
    }
}

/// Compares parsed URLs so `https://a.example` matches `https://a.example/`.
fn is_canonical_url(view: &ModView, url: &str) -> bool {
    Url::parse(url).is_ok_and(|url| url == view.canonical_url)
}

// ============================================================================
// Tests
// ============================================================================
