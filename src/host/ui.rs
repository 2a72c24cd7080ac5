//! Hooks into the page that embeds extension frames.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tracing::{error, info};

use crate::identifiers::ExtensionId;

// ============================================================================
// EmbeddingUi
// ============================================================================

/// What the controller asks of the embedding page.
#[async_trait]
pub trait EmbeddingUi: Send + Sync + 'static {
    /// Makes the extension's frame visible.
    async fn display_frame(&self, extension_id: ExtensionId);

    /// Shows an unrecoverable error to the user.
    async fn show_fatal_error(&self, extension_id: ExtensionId, message: &str, details: &str);

    /// Asks whether the extension may close. `false` keeps it running.
    async fn confirm_exit(&self, extension_id: ExtensionId) -> bool;
}

// ============================================================================
// HeadlessUi
// ============================================================================

/// UI without a page: logs everything and confirms every exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessUi;

#[async_trait]
impl EmbeddingUi for HeadlessUi {
    async fn display_frame(&self, extension_id: ExtensionId) {
        info!(%extension_id, "Extension frame displayed");
    }

    async fn show_fatal_error(&self, extension_id: ExtensionId, message: &str, details: &str) {
        error!(%extension_id, details, "{message}");
    }

    async fn confirm_exit(&self, _extension_id: ExtensionId) -> bool {
        true
    }
}
