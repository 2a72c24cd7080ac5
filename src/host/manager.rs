//! Host-wide registry of running extensions.
//!
//! The [`ExtensionHost`] launches one [`ExtensionController`] per manifest,
//! tracks it by [`ExtensionId`], and gates nested embedding on the parent's
//! `embedExtensions` grant.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::extension::ExtensionManifest;
use crate::identifiers::ExtensionId;
use crate::permissions::{CapabilityKey, HostPolicy, PermissionRegistry};

use super::builder::HostBuilder;
use super::controller::{ControllerServices, ExtensionController};
use super::options::ControllerOptions;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the host.
pub(crate) struct HostInner {
    /// Collaborators handed to every controller.
    pub services: ControllerServices,

    /// Intersected with every manifest's permissions.
    pub policy: HostPolicy,

    /// Applied to every controller.
    pub options: ControllerOptions,

    /// Live controllers tracked by extension ID.
    pub controllers: Mutex<FxHashMap<ExtensionId, Arc<ExtensionController>>>,
}

// ============================================================================
// ExtensionHost
// ============================================================================

/// Launches and tracks extensions.
///
/// # Example
///
/// ```ignore
/// let host = ExtensionHost::builder().launcher(launcher).build()?;
/// let game = host.launch(manifest).await?;
/// let mod_frame = host.embed(game.id(), mod_manifest).await?;
/// host.shutdown().await;
/// ```
#[derive(Clone)]
pub struct ExtensionHost {
    /// Shared inner state.
    pub(crate) inner: Arc<HostInner>,
}

impl fmt::Debug for ExtensionHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionHost")
            .field("policy", &self.inner.policy)
            .field("extensions", &self.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ExtensionHost - Public API
// ============================================================================

impl ExtensionHost {
    /// Creates a configuration builder for the host.
    #[inline]
    #[must_use]
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    /// Validates `manifest`, launches its context and waits for the secure context.
    ///
    /// The controller is registered before the handshake so it can be found
    /// while loading. A failed launch removes it again, and so does the
    /// controller reaching a terminal state on its own (extension `exit` or
    /// a fatal error).
    ///
    /// # Errors
    ///
    /// - [`Error::Manifest`] if the manifest is invalid
    /// - [`Error::HandshakeTimeout`] if the context never reported in
    /// - launcher errors
    pub async fn launch(&self, manifest: ExtensionManifest) -> Result<Arc<ExtensionController>> {
        manifest.validate()?;

        let registry = PermissionRegistry::new(&manifest.permissions, &self.inner.policy);
        if registry.has_unsafe_permissions() {
            info!(name = %manifest.name, "Extension granted unsafe permissions");
        }

        let controller = Arc::new(ExtensionController::new(
            manifest,
            registry,
            self.inner.services.clone(),
            self.inner.options.clone(),
        ));
        let extension_id = controller.id();
        self.inner
            .controllers
            .lock()
            .insert(extension_id, Arc::clone(&controller));
        self.forget_when_terminal(&controller);

        if let Err(e) = controller.start().await {
            self.inner.controllers.lock().remove(&extension_id);
            return Err(e);
        }

        info!(%extension_id, name = %controller.manifest().name, "Extension launched");
        Ok(controller)
    }

    /// Launches `manifest` on behalf of the extension `parent_id`.
    ///
    /// # Errors
    ///
    /// - [`Error::ExtensionNotFound`] if the parent is not tracked
    /// - [`Error::InvalidState`] if the parent is not `Ready` or `Running`
    /// - [`Error::PermissionDenied`] if the parent may not embed this URL
    /// - everything [`launch`](Self::launch) returns
    pub async fn embed(
        &self,
        parent_id: ExtensionId,
        manifest: ExtensionManifest,
    ) -> Result<Arc<ExtensionController>> {
        let parent = self
            .get(parent_id)
            .ok_or_else(|| Error::extension_not_found(parent_id))?;

        let state = parent.state();
        if !state.accepts_privileged_calls() {
            return Err(Error::invalid_state(state, "embed"));
        }
        parent.registry().check(
            CapabilityKey::EmbedExtensions,
            Some(manifest.canonical_url.as_str()),
        )?;

        debug!(%parent_id, url = %manifest.canonical_url, "Embedding extension");
        self.launch(manifest).await
    }

    /// Exits the extension and forgets it.
    ///
    /// # Errors
    ///
    /// - [`Error::ExtensionNotFound`] if no such extension is tracked
    /// - errors from [`ExtensionController::exit`]
    pub async fn exit(&self, extension_id: ExtensionId) -> Result<bool> {
        let controller = self
            .get(extension_id)
            .ok_or_else(|| Error::extension_not_found(extension_id))?;

        let exited = controller.exit().await?;
        self.inner.controllers.lock().remove(&extension_id);
        Ok(exited)
    }

    /// Returns the controller for `extension_id`.
    #[must_use]
    pub fn get(&self, extension_id: ExtensionId) -> Option<Arc<ExtensionController>> {
        self.inner.controllers.lock().get(&extension_id).cloned()
    }

    /// Returns the IDs of every tracked extension.
    #[must_use]
    pub fn ids(&self) -> Vec<ExtensionId> {
        self.inner.controllers.lock().keys().copied().collect()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.controllers.lock().len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.controllers.lock().is_empty()
    }

    /// Exits every extension concurrently. Returns how many were tracked.
    pub async fn shutdown(&self) -> usize {
        let controllers: Vec<Arc<ExtensionController>> = {
            let mut map = self.inner.controllers.lock();
            map.drain().map(|(_, c)| c).collect()
        };

        info!(count = controllers.len(), "Shutting down all extensions");

        let results = join_all(controllers.iter().map(|c| c.exit())).await;
        for (controller, result) in controllers.iter().zip(results) {
            if let Err(e) = result {
                debug!(extension_id = %controller.id(), error = %e, "Error exiting during shutdown");
            }
        }

        controllers.len()
    }
}

// ============================================================================
// ExtensionHost - Internal
// ============================================================================

impl ExtensionHost {
    pub(crate) fn new(
        services: ControllerServices,
        policy: HostPolicy,
        options: ControllerOptions,
    ) -> Self {
        debug!("Extension host created");
        Self {
            inner: Arc::new(HostInner {
                services,
                policy,
                options,
                controllers: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    /// Drops `controller` from the map once it is terminal.
    fn forget_when_terminal(&self, controller: &ExtensionController) {
        let extension_id = controller.id();
        let mut state_rx = controller.subscribe();
        let host: Weak<HostInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                if state_rx.borrow_and_update().is_terminal() {
                    break;
                }
                if state_rx.changed().await.is_err() {
                    break;
                }
            }
            if let Some(host) = host.upgrade()
                && host.controllers.lock().remove(&extension_id).is_some()
            {
                debug!(%extension_id, "Terminal extension forgotten");
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;

    use crate::host::ControllerState;
    use crate::rpc::{Bridge, DaemonClient, HandlerTable};
    use crate::sandbox::InProcessLauncher;
    use crate::transport::Transport;

    /// Contexts that complete the handshake on their own.
    fn eager_launcher() -> Arc<InProcessLauncher> {
        Arc::new(InProcessLauncher::new(|_, transport: Transport| async move {
            let bridge = Bridge::new(transport, Arc::new(HandlerTable::new()));
            let client = DaemonClient::new(bridge.clone());
            if client.secure_context_established().await.unwrap_or(false) {
                let _ = client.get_initial_state().await;
                let _ = client.ready_for_display().await;
            }
            bridge.closed().await;
        }))
    }

    /// Contexts that establish the secure context and then stall.
    fn stalled_launcher() -> Arc<InProcessLauncher> {
        Arc::new(InProcessLauncher::new(|_, transport: Transport| async move {
            let bridge = Bridge::new(transport, Arc::new(HandlerTable::new()));
            let client = DaemonClient::new(bridge.clone());
            let _ = client.secure_context_established().await;
            bridge.closed().await;
        }))
    }

    /// Contexts that finish the handshake and then exit themselves.
    fn self_exiting_launcher() -> Arc<InProcessLauncher> {
        Arc::new(InProcessLauncher::new(|_, transport: Transport| async move {
            let bridge = Bridge::new(transport, Arc::new(HandlerTable::new()));
            let client = DaemonClient::new(bridge.clone());
            if client.secure_context_established().await.unwrap_or(false) {
                let _ = client.ready_for_display().await;
                let _ = client.exit().await;
            }
            bridge.closed().await;
        }))
    }

    /// Polls until the host tracks nothing.
    async fn wait_until_empty(host: &ExtensionHost) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !host.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("host never forgot the extension");
    }

    fn manifest(url: &str, permissions: serde_json::Value) -> ExtensionManifest {
        ExtensionManifest::from_json(
            &json!({
                "name": "demo",
                "version": "0.3.0-beta",
                "entry": "main.js",
                "canonicalUrl": url,
                "permissions": permissions,
            })
            .to_string(),
        )
        .expect("manifest")
    }

    fn host() -> ExtensionHost {
        ExtensionHost::builder()
            .launcher(eager_launcher())
            .build()
            .expect("build")
    }

    #[tokio::test]
    async fn test_launch_tracks_controller() {
        let host = host();
        let controller = host
            .launch(manifest("https://game.example/", json!([])))
            .await
            .expect("launch");

        controller
            .wait_for_state(ControllerState::Running, Duration::from_secs(2))
            .await
            .expect("running");
        assert_eq!(host.len(), 1);
        assert_eq!(host.ids(), vec![controller.id()]);
    }

    #[tokio::test]
    async fn test_embed_requires_grant() {
        let host = host();
        let parent = host
            .launch(manifest(
                "https://game.example/",
                json!(["embedExtensions:https://mods.example/allowed/"]),
            ))
            .await
            .expect("launch");
        parent
            .wait_for_state(ControllerState::Running, Duration::from_secs(2))
            .await
            .expect("running");

        let child = host
            .embed(parent.id(), manifest("https://mods.example/allowed/", json!([])))
            .await
            .expect("embed");
        assert_ne!(child.id(), parent.id());

        let err = host
            .embed(parent.id(), manifest("https://mods.example/other/", json!([])))
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(host.len(), 2);
    }

    #[tokio::test]
    async fn test_embed_refused_before_parent_is_ready() {
        let host = ExtensionHost::builder()
            .launcher(stalled_launcher())
            .build()
            .expect("build");
        let parent = host
            .launch(manifest("https://game.example/", json!(["embedExtensions:allowAll"])))
            .await
            .expect("launch");
        assert_eq!(parent.state(), ControllerState::HandshakeInProgress);

        let err = host
            .embed(parent.id(), manifest("https://mods.example/a/", json!([])))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }), "got {err:?}");
        assert_eq!(host.len(), 1);
    }

    #[tokio::test]
    async fn test_embed_unknown_parent() {
        let host = host();
        let err = host
            .embed(ExtensionId::generate(), manifest("https://a.example/", json!([])))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExtensionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_exit_forgets_controller() {
        let host = host();
        let controller = host
            .launch(manifest("https://game.example/", json!([])))
            .await
            .expect("launch");

        assert!(host.exit(controller.id()).await.expect("exit"));
        assert!(host.is_empty());
        assert_eq!(controller.state(), ControllerState::Terminated);
        assert!(host.exit(controller.id()).await.is_err());
    }

    #[tokio::test]
    async fn test_self_exited_extension_is_forgotten() {
        let host = ExtensionHost::builder()
            .launcher(self_exiting_launcher())
            .build()
            .expect("build");
        let controller = host
            .launch(manifest("https://game.example/", json!([])))
            .await
            .expect("launch");

        controller
            .wait_for_state(ControllerState::Terminated, Duration::from_secs(2))
            .await
            .expect("terminated");
        wait_until_empty(&host).await;
        assert!(host.get(controller.id()).is_none());
    }

    #[tokio::test]
    async fn test_fatal_extension_is_forgotten() {
        let host = host();
        let controller = host
            .launch(manifest("https://game.example/", json!([])))
            .await
            .expect("launch");

        controller.fatal_error("renderer crashed").await;
        assert_eq!(controller.state(), ControllerState::FatalError);
        wait_until_empty(&host).await;
    }

    #[tokio::test]
    async fn test_failed_launch_is_not_tracked() {
        let silent = Arc::new(InProcessLauncher::new(|_, transport: Transport| async move {
            let _silent = transport;
            std::future::pending::<()>().await;
        }));
        let host = ExtensionHost::builder()
            .launcher(silent)
            .options(
                ControllerOptions::new()
                    .with_handshake_timeout(Duration::from_millis(50))
                    .with_exit_timeout(Duration::from_millis(200)),
            )
            .build()
            .expect("build");

        let err = host
            .launch(manifest("https://game.example/", json!([])))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(host.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_exits_everything() {
        let host = host();
        let a = host
            .launch(manifest("https://a.example/", json!([])))
            .await
            .expect("launch");
        let b = host
            .launch(manifest("https://b.example/", json!([])))
            .await
            .expect("launch");

        assert_eq!(host.shutdown().await, 2);
        assert!(host.is_empty());
        assert_eq!(a.state(), ControllerState::Terminated);
        assert_eq!(b.state(), ControllerState::Terminated);
    }
}
