//! Builder pattern for host configuration.
//!
//! Provides a fluent API for wiring collaborators into an [`ExtensionHost`].
//!
//! # Example
//!
//! ```ignore
//! use extension_host::host::ExtensionHost;
//!
//! let host = ExtensionHost::builder()
//!     .launcher(launcher)
//!     .saves(saves)
//!     .policy(HostPolicy::restrictive())
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::permissions::HostPolicy;
use crate::providers::{FileProvider, SaveProvider};
use crate::sandbox::ContextLauncher;

use super::controller::ControllerServices;
use super::manager::ExtensionHost;
use super::options::ControllerOptions;
use super::ui::EmbeddingUi;

// ============================================================================
// HostBuilder
// ============================================================================

/// Builder for configuring an [`ExtensionHost`].
///
/// Use [`ExtensionHost::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct HostBuilder {
    /// Creates extension contexts. Required.
    launcher: Option<Arc<dyn ContextLauncher>>,
    /// Save storage. Defaults to an in-memory store.
    saves: Option<Arc<dyn SaveProvider>>,
    /// File lookup. Defaults to an empty in-memory cache.
    files: Option<Arc<dyn FileProvider>>,
    /// Embedding page. Defaults to a headless UI.
    ui: Option<Arc<dyn EmbeddingUi>>,
    /// Capabilities the host is willing to grant.
    policy: HostPolicy,
    /// Options applied to every controller.
    options: ControllerOptions,
}

impl fmt::Debug for HostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuilder")
            .field("launcher", &self.launcher.is_some())
            .field("policy", &self.policy)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// HostBuilder Implementation
// ============================================================================

impl HostBuilder {
    /// Creates a builder with no launcher and default everything else.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how extension contexts are created.
    #[inline]
    #[must_use]
    pub fn launcher(mut self, launcher: Arc<dyn ContextLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    #[inline]
    #[must_use]
    pub fn saves(mut self, saves: Arc<dyn SaveProvider>) -> Self {
        self.saves = Some(saves);
        self
    }

    #[inline]
    #[must_use]
    pub fn files(mut self, files: Arc<dyn FileProvider>) -> Self {
        self.files = Some(files);
        self
    }

    #[inline]
    #[must_use]
    pub fn ui(mut self, ui: Arc<dyn EmbeddingUi>) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Sets the policy intersected with every manifest's permissions.
    #[inline]
    #[must_use]
    pub fn policy(mut self, policy: HostPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[inline]
    #[must_use]
    pub fn options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the host with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no launcher was set
    /// - [`Error::Config`] if the controller options are invalid
    pub fn build(self) -> Result<ExtensionHost> {
        let launcher = self.validate_launcher()?;
        self.options.validate()?;

        let mut services = ControllerServices::new(launcher);
        if let Some(saves) = self.saves {
            services = services.with_saves(saves);
        }
        if let Some(files) = self.files {
            services = services.with_files(files);
        }
        if let Some(ui) = self.ui {
            services = services.with_ui(ui);
        }

        Ok(ExtensionHost::new(services, self.policy, self.options))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl HostBuilder {
    fn validate_launcher(&self) -> Result<Arc<dyn ContextLauncher>> {
        self.launcher.clone().ok_or_else(|| {
            Error::config(
                "A context launcher is required. Use .launcher() to set it.\n\
                 Example: ExtensionHost::builder().launcher(Arc::new(InProcessLauncher::new(..)))",
            )
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
