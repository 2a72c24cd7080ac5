//! Typed client for the daemon's method table.
//!
//! Used from the extension side of a bridge. Every method maps one-to-one
//! onto a [`DaemonMethod`] variant.

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::SaveId;
use crate::protocol::{
    DaemonMethod, FatalErrorConfig, FileTransfer, InitialExtensionState, Payload,
    ReconfigurationConfig,
};
use crate::providers::SaveRecord;

use super::bridge::Bridge;

// ============================================================================
// DaemonClient
// ============================================================================

/// Extension-side view of the host daemon.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    bridge: Bridge,
}

impl DaemonClient {
    /// Wraps the extension's end of the bridge.
    #[inline]
    #[must_use]
    pub fn new(bridge: Bridge) -> Self {
        Self { bridge }
    }

    /// Returns the underlying bridge.
    #[inline]
    #[must_use]
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Fetches a file through the host. `None` means not found.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] on denial, or a connection error.
    pub async fn get_file(&self, url: &str) -> Result<Option<FileTransfer>> {
        let payload = self
            .call(DaemonMethod::GetFile {
                url: url.to_string(),
            })
            .await?;
        FileTransfer::from_payload(payload)
    }

    /// Receives the handshake payload. `None` after the first successful call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] outside the handshake, or a connection error.
    pub async fn get_initial_state(&self) -> Result<Option<InitialExtensionState>> {
        self.typed(DaemonMethod::GetInitialState).await
    }

    /// Reports that the secure context is established.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the host is gone.
    pub async fn secure_context_established(&self) -> Result<bool> {
        self.typed(DaemonMethod::SecureContextEstablished).await
    }

    /// Reports an unrecoverable error. The host tears the context down.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the host is gone.
    pub async fn signal_fatal_error(&self, details: impl Into<String>) -> Result<bool> {
        self.typed(DaemonMethod::SignalFatalError(FatalErrorConfig {
            details: details.into(),
        }))
        .await
    }

    /// Asks the host to show the extension.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the host is gone.
    pub async fn ready_for_display(&self) -> Result<bool> {
        self.typed(DaemonMethod::ReadyForDisplay).await
    }

    /// Asks the host to close the extension.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the host is gone.
    pub async fn exit(&self) -> Result<bool> {
        self.typed(DaemonMethod::Exit).await
    }

    /// Reads a save. Negative IDs select the latest save.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] without `gameSaves:read`.
    pub async fn get_save_file(&self, id: i64) -> Result<Option<SaveRecord>> {
        self.typed(DaemonMethod::GetSaveFile { id }).await
    }

    /// Creates a save and returns its ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] without `gameSaves:write`.
    pub async fn create_save(&self) -> Result<SaveId> {
        self.typed(DaemonMethod::CreateSave).await
    }

    /// Asks the host to narrow the `embedExtensions` scope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the host refuses.
    pub async fn reconfigure_permissions(&self, canonical_urls: Vec<String>) -> Result<bool> {
        self.typed(DaemonMethod::ReconfigurePermissions(ReconfigurationConfig {
            canonical_urls,
        }))
        .await
    }

    /// Sends one daemon call.
    async fn call(&self, method: DaemonMethod) -> Result<Payload> {
        debug!(method = method.name(), "Calling daemon");
        self.bridge
            .execute(method.name(), Payload::value(method.param()))
            .await
    }

    /// Sends one daemon call and decodes the result.
    async fn typed<T: DeserializeOwned>(&self, method: DaemonMethod) -> Result<T> {
        let name = method.name();
        self.call(method)
            .await?
            .deserialize()
            .map_err(|e| Error::protocol(format!("unexpected \"{name}\" result: {e}")))
    }
}
