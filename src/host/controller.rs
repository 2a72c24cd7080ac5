//! Lifecycle controller for one loaded extension.
//!
//! The controller owns the context, the bridge to it and the extension's
//! permission registry. Its state lives in a `watch` channel so handlers and
//! callers observe transitions without polling.
//!
//! # Example
//!
//! ```ignore
//! let controller = ExtensionController::new(manifest, registry, services, options);
//! controller.start().await?;
//! controller.wait_for_state(ControllerState::Running, Duration::from_secs(5)).await?;
//! controller.exit().await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::extension::{ExtensionManifest, ModRegistry};
use crate::identifiers::ExtensionId;
use crate::permissions::PermissionRegistry;
use crate::providers::{FileProvider, MemoryFileCache, MemorySaveStore, SaveProvider};
use crate::rpc::{Bridge, CloseReason, MethodTable};
use crate::sandbox::{ContextLauncher, SandboxPolicy, SandboxRequest};

use super::daemon::DaemonTable;
use super::options::ControllerOptions;
use super::state::ControllerState;
use super::ui::{EmbeddingUi, HeadlessUi};

// ============================================================================
// Constants
// ============================================================================

/// Headline shown with every fatal error.
pub const FATAL_ERROR_MESSAGE: &str = "Encountered a fatal error";

// ============================================================================
// ControllerServices
// ============================================================================

/// Host collaborators a controller delegates to.
#[derive(Clone)]
pub struct ControllerServices {
    /// Creates and destroys contexts.
    pub launcher: Arc<dyn ContextLauncher>,
    /// Save storage.
    pub saves: Arc<dyn SaveProvider>,
    /// File lookup.
    pub files: Arc<dyn FileProvider>,
    /// Embedding page.
    pub ui: Arc<dyn EmbeddingUi>,
}

impl ControllerServices {
    /// Uses `launcher` with in-memory storage and a headless UI.
    #[must_use]
    pub fn new(launcher: Arc<dyn ContextLauncher>) -> Self {
        Self {
            launcher,
            saves: Arc::new(MemorySaveStore::new()),
            files: Arc::new(MemoryFileCache::new()),
            ui: Arc::new(HeadlessUi),
        }
    }

    #[must_use]
    pub fn with_saves(mut self, saves: Arc<dyn SaveProvider>) -> Self {
        self.saves = saves;
        self
    }

    #[must_use]
    pub fn with_files(mut self, files: Arc<dyn FileProvider>) -> Self {
        self.files = files;
        self
    }

    #[must_use]
    pub fn with_ui(mut self, ui: Arc<dyn EmbeddingUi>) -> Self {
        self.ui = ui;
        self
    }
}

impl fmt::Debug for ControllerServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerServices").finish_non_exhaustive()
    }
}

// ============================================================================
// ControllerInner
// ============================================================================

/// State shared between the controller and its daemon handlers.
pub(crate) struct ControllerInner {
    pub(super) id: ExtensionId,
    pub(super) manifest: Arc<ExtensionManifest>,
    pub(super) options: ControllerOptions,
    pub(super) registry: Arc<PermissionRegistry>,
    pub(super) mods: ModRegistry,
    pub(super) services: ControllerServices,
    /// When loading began; `readyForDisplay` is held until the minimum load time.
    pub(super) loading_since: Mutex<Instant>,
    /// `getInitialState` is answered once.
    pub(super) initial_state_sent: AtomicBool,
    state: watch::Sender<ControllerState>,
    bridge: Mutex<Option<Bridge>>,
    torn_down: AtomicBool,
}

impl ControllerInner {
    #[inline]
    pub(super) fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Applies a transition if it is legal. Returns `true` if applied.
    pub(super) fn transition(&self, next: ControllerState) -> bool {
        let mut previous = None;
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                previous = Some(*current);
                *current = next;
                true
            } else {
                false
            }
        });

        match previous {
            Some(previous) => {
                info!(extension_id = %self.id, from = %previous, to = %next, "State transition");
                true
            }
            None => {
                debug!(extension_id = %self.id, state = %self.state(), refused = %next, "Transition refused");
                false
            }
        }
    }

    /// Moves to `FatalError`. Returns `false` if already terminal.
    pub(super) fn begin_fatal_error(&self, details: &str) -> bool {
        if !self.transition(ControllerState::FatalError) {
            return false;
        }
        error!(extension_id = %self.id, details, "Extension entered fatal error");
        true
    }

    /// Closes the bridge, waits for it to flush, then destroys the context.
    ///
    /// Runs once; later calls return immediately.
    pub(super) async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let bridge = self.bridge.lock().clone();
        if let Some(bridge) = bridge {
            bridge.close(CloseReason::ContextTerminated);
            if timeout(self.options.exit_timeout, bridge.finished())
                .await
                .is_err()
            {
                warn!(extension_id = %self.id, "Bridge did not close in time");
            }
        }

        self.services.launcher.destroy(self.id).await;
        self.mods.unload_all();
        debug!(extension_id = %self.id, "Context torn down");
    }
}

// ============================================================================
// ExtensionController
// ============================================================================

/// Drives one extension from launch to termination.
pub struct ExtensionController {
    pub(super) inner: Arc<ControllerInner>,
}

impl fmt::Debug for ExtensionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionController")
            .field("id", &self.inner.id)
            .field("name", &self.inner.manifest.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ExtensionController {
    /// Creates a controller in [`ControllerState::Created`].
    #[must_use]
    pub fn new(
        manifest: ExtensionManifest,
        registry: PermissionRegistry,
        services: ControllerServices,
        options: ControllerOptions,
    ) -> Self {
        let (state, _) = watch::channel(ControllerState::Created);
        let inner = ControllerInner {
            id: ExtensionId::generate(),
            manifest: Arc::new(manifest),
            options,
            registry: Arc::new(registry),
            mods: ModRegistry::new(),
            services,
            loading_since: Mutex::new(Instant::now()),
            initial_state_sent: AtomicBool::new(false),
            state,
            bridge: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ExtensionId {
        self.inner.id
    }

    #[inline]
    #[must_use]
    pub fn manifest(&self) -> &ExtensionManifest {
        &self.inner.manifest
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.inner.state()
    }

    /// Returns a receiver that observes every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.inner.state.subscribe()
    }

    /// Returns the extension's permission registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<PermissionRegistry> {
        &self.inner.registry
    }

    /// Returns the mods loaded into this extension.
    #[inline]
    #[must_use]
    pub fn mods(&self) -> &ModRegistry {
        &self.inner.mods
    }

    /// Returns the bridge for host-to-extension calls, once launched.
    #[must_use]
    pub fn bridge(&self) -> Option<Bridge> {
        self.inner.bridge.lock().clone()
    }

    /// Launches the context and waits for it to establish a secure context.
    ///
    /// A context that stays silent past the handshake timeout is destroyed
    /// and the controller ends in [`ControllerState::FatalError`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if already started
    /// - [`Error::HandshakeTimeout`] if the context never reported in
    /// - launcher and sandbox configuration errors
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.transition(ControllerState::ContextLoading) {
            return Err(Error::invalid_state(inner.state(), "start"));
        }
        *inner.loading_since.lock() = Instant::now();

        let transport = match self.sandbox_request() {
            Ok(request) => inner.services.launcher.launch(&request).await,
            Err(e) => Err(e),
        };
        let transport = match transport {
            Ok(transport) => transport,
            Err(e) => {
                self.fail(&format!("failed to launch context: {e}")).await;
                return Err(e);
            }
        };

        let table: Arc<dyn MethodTable> = Arc::new(DaemonTable::new(Arc::clone(inner)));
        let bridge = Bridge::with_shutdown_grace(transport, table, inner.options.shutdown_grace);
        *inner.bridge.lock() = Some(bridge.clone());

        // Exit raced the launch and found no bridge to close.
        if inner.torn_down.load(Ordering::Acquire) {
            bridge.close(CloseReason::ContextTerminated);
            return Err(Error::invalid_state(inner.state(), "start"));
        }

        info!(
            extension_id = %inner.id,
            name = %inner.manifest.name,
            version = %inner.manifest.version,
            "Context launched"
        );

        let deadline = inner.options.handshake_timeout;
        let mut state_rx = inner.state.subscribe();
        let reached = timeout(
            deadline,
            state_rx.wait_for(|state| *state != ControllerState::ContextLoading),
        )
        .await
        .map(|received| received.map(|state| *state));

        match reached {
            Ok(Ok(state)) if !state.is_terminal() && state != ControllerState::Exiting => Ok(()),
            Ok(Ok(state)) => Err(Error::invalid_state(state, "start")),
            Ok(Err(_)) => Err(Error::invalid_state(inner.state(), "start")),
            Err(_) => {
                let timeout_ms = deadline.as_millis() as u64;
                self.fail(&format!(
                    "context did not establish a secure context within {timeout_ms} ms"
                ))
                .await;
                Err(Error::handshake_timeout(timeout_ms))
            }
        }
    }

    /// Waits until the controller reaches `target`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if a different terminal state is reached
    /// - [`Error::Timeout`] if `deadline` passes first
    pub async fn wait_for_state(&self, target: ControllerState, deadline: Duration) -> Result<()> {
        let mut state_rx = self.inner.state.subscribe();
        let reached = timeout(
            deadline,
            state_rx.wait_for(|state| *state == target || state.is_terminal()),
        )
        .await
        .map(|received| received.map(|state| *state));

        let operation = format!("wait for {target}");
        match reached {
            Ok(Ok(state)) if state == target => Ok(()),
            Ok(Ok(state)) => Err(Error::invalid_state(state, operation)),
            Ok(Err(_)) => Err(Error::invalid_state(self.state(), operation)),
            Err(_) => Err(Error::timeout(operation, deadline.as_millis() as u64)),
        }
    }

    /// Exits the extension and destroys its context.
    ///
    /// Returns `true` once terminated. Exiting an already terminated
    /// controller is a no-op that returns `true`; after a fatal error the
    /// result is `false`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if a concurrent exit does not finish in time.
    pub async fn exit(&self) -> Result<bool> {
        let inner = &self.inner;
        loop {
            match inner.state() {
                ControllerState::Terminated => return Ok(true),
                ControllerState::FatalError => return Ok(false),
                ControllerState::Exiting => return self.await_exit().await,
                _ if inner.transition(ControllerState::Exiting) => break,
                // Lost a race with another transition; look again.
                _ => {}
            }
        }

        inner.teardown().await;
        inner.transition(ControllerState::Terminated);
        Ok(true)
    }

    /// Tears the extension down after a host-side fatal error.
    ///
    /// Returns `false` if the controller was already terminal.
    pub async fn fatal_error(&self, details: &str) -> bool {
        self.fail(details).await
    }

    /// Replaces the extension's `embedExtensions` scope.
    ///
    /// This is the privileged host path and may be used any number of times.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] once the controller is terminal.
    pub fn reconfigure_permissions(&self, canonical_urls: Vec<String>) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(Error::invalid_state(state, "reconfigure permissions"));
        }
        self.inner.registry.reconfigure(canonical_urls);
        Ok(())
    }

    /// Builds the launch request from the manifest and current grants.
    fn sandbox_request(&self) -> Result<SandboxRequest> {
        let inner = &self.inner;
        let cargo_origin = inner.manifest.root_url().origin().ascii_serialization();
        let policy = SandboxPolicy::from_grants(
            &inner.registry.snapshot(),
            &inner.options.csp_config(cargo_origin),
        );
        let entry = inner.manifest.entry_url()?;
        let launch_url = policy.launch_url(&inner.options.sandbox_origin, entry.as_str())?;

        Ok(SandboxRequest {
            extension_id: inner.id,
            manifest: Arc::clone(&inner.manifest),
            policy,
            launch_url,
        })
    }

    /// Enters `FatalError`, tells the UI and destroys the context.
    async fn fail(&self, details: &str) -> bool {
        let inner = &self.inner;
        if !inner.begin_fatal_error(details) {
            return false;
        }
        inner
            .services
            .ui
            .show_fatal_error(inner.id, FATAL_ERROR_MESSAGE, details)
            .await;
        inner.teardown().await;
        true
    }

    /// Waits for an exit started elsewhere.
    async fn await_exit(&self) -> Result<bool> {
        let deadline = self.inner.options.exit_timeout * 2;
        let mut state_rx = self.inner.state.subscribe();
        let finished = timeout(deadline, state_rx.wait_for(|state| state.is_terminal()))
            .await
            .map(|received| received.map(|state| *state));

        match finished {
            Ok(Ok(state)) => Ok(state == ControllerState::Terminated),
            Ok(Err(_)) => Ok(self.state() == ControllerState::Terminated),
            Err(_) => Err(Error::timeout("exit", deadline.as_millis() as u64)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
