//! Per-controller timing and handshake configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use extension_host::host::ControllerOptions;
//!
//! let options = ControllerOptions::new()
//!     .with_origin("https://host.example")
//!     .with_handshake_timeout(Duration::from_secs(5))
//!     .with_minimum_load_time(Duration::from_millis(500));
//! options.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::sandbox::CspConfig;

// ============================================================================
// Defaults
// ============================================================================

/// Time a context has to report `secureContextEstablished`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Time the embedding UI has to confirm an exit, and the context to drain.
pub const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time in-flight handlers get to answer when the bridge closes.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const DEFAULT_ORIGIN: &str = "http://localhost";
const DEFAULT_SANDBOX_ORIGIN: &str = "http://sandbox.localhost";
const DEFAULT_STYLE_SHEET: &str = "/large-assets/recommended-styles.css";

// ============================================================================
// ControllerOptions
// ============================================================================

/// Configuration shared by every controller a host launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Bound on the secure-context step of the handshake.
    pub handshake_timeout: Duration,

    /// Bound on exit confirmation and context drain.
    pub exit_timeout: Duration,

    /// Drain period for in-flight handlers on close.
    pub shutdown_grace: Duration,

    /// Minimum time between `readyForDisplay` and the frame being shown.
    pub minimum_load_time: Duration,

    /// Origin of the host page.
    pub origin: String,

    /// Origin sandboxed frames are served from.
    pub sandbox_origin: String,

    /// Stylesheet offered to extensions. Relative paths resolve against `origin`.
    pub recommended_style_sheet_url: String,

    /// Opaque string handed to the extension in its initial state.
    pub query_state: String,

    /// Whether the host origin is an allowed CSP source.
    pub allow_host_origin: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ControllerOptions {
    /// Creates options with default timings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            exit_timeout: DEFAULT_EXIT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            minimum_load_time: Duration::ZERO,
            origin: DEFAULT_ORIGIN.to_string(),
            sandbox_origin: DEFAULT_SANDBOX_ORIGIN.to_string(),
            recommended_style_sheet_url: DEFAULT_STYLE_SHEET.to_string(),
            query_state: String::new(),
            allow_host_origin: true,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ControllerOptions {
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_exit_timeout(mut self, timeout: Duration) -> Self {
        self.exit_timeout = timeout;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_minimum_load_time(mut self, minimum: Duration) -> Self {
        self.minimum_load_time = minimum;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_sandbox_origin(mut self, origin: impl Into<String>) -> Self {
        self.sandbox_origin = origin.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_recommended_style_sheet_url(mut self, url: impl Into<String>) -> Self {
        self.recommended_style_sheet_url = url.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_query_state(mut self, query_state: impl Into<String>) -> Self {
        self.query_state = query_state.into();
        self
    }

    /// Removes the host origin from the CSP sources.
    #[inline]
    #[must_use]
    pub fn without_host_origin(mut self) -> Self {
        self.allow_host_origin = false;
        self
    }
}

// ============================================================================
// Derived Values
// ============================================================================

impl ControllerOptions {
    /// Checks the options for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for zero timeouts or origins that are not
    /// absolute URLs.
    pub fn validate(&self) -> Result<()> {
        if self.handshake_timeout.is_zero() {
            return Err(Error::config("handshake timeout must be greater than zero"));
        }
        if self.exit_timeout.is_zero() {
            return Err(Error::config("exit timeout must be greater than zero"));
        }
        for (name, origin) in [("origin", &self.origin), ("sandbox origin", &self.sandbox_origin)] {
            Url::parse(origin)
                .map_err(|e| Error::config(format!("{name} \"{origin}\" is not a URL: {e}")))?;
        }
        Ok(())
    }

    /// Returns the absolute stylesheet URL.
    ///
    /// Absolute `http(s)` URLs are kept. Anything else is a path under `origin`.
    #[must_use]
    pub fn style_sheet_url(&self) -> String {
        let raw = self.recommended_style_sheet_url.as_str();
        if raw.starts_with("https://") || raw.starts_with("http://") {
            return raw.to_string();
        }
        format!(
            "{}/{}",
            self.origin.trim_end_matches('/'),
            raw.strip_prefix('/').unwrap_or(raw)
        )
    }

    /// Returns the CSP inputs for an extension served from `cargo_origin`.
    #[must_use]
    pub fn csp_config(&self, cargo_origin: impl Into<String>) -> CspConfig {
        let config = CspConfig::new(self.origin.clone()).with_cargo_origin(cargo_origin);
        if self.allow_host_origin {
            config
        } else {
            config.without_host_origin()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
