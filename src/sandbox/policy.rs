//! Browser isolation policy derived from an extension's grants.
//!
//! | Output | Used as |
//! |--------|---------|
//! | `content_security_policy` | CSP header of the sandboxed document |
//! | `iframe_allow` | `allow` attribute of the frame |
//! | `sandbox_tokens` | `sandbox` attribute of the frame |
//! | `launch_url` | URL the frame navigates to |
//!
//! # Example
//!
//! ```ignore
//! let policy = SandboxPolicy::from_grants(&grants, &CspConfig::new("https://host.example"));
//! let url = policy.launch_url("https://sandbox.example", "https://mods.example/game/index.js")?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use url::Url;

use crate::error::{Error, Result};
use crate::permissions::{ALLOW_ALL, Capability, CapabilityKey, GrantSet};

// ============================================================================
// Constants
// ============================================================================

/// Directives appended to every policy.
const CSP_TAIL: &str = "object-src 'none'; base-uri 'none'";

/// Frame features and the capability that unlocks each.
const FRAME_FEATURES: [(Capability, &str); 5] = [
    (Capability::Camera, "camera"),
    (Capability::Microphone, "microphone"),
    (Capability::GeoLocation, "geolocation"),
    (Capability::DisplayCapture, "display-capture"),
    (Capability::FullScreen, "fullscreen"),
];

// ============================================================================
// CspConfig
// ============================================================================

/// Host-side inputs to CSP generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CspConfig {
    /// Origin of the host page.
    pub host_origin: String,
    /// Whether the host origin is an allowed source.
    pub allow_host_origin: bool,
    /// Origin the extension's own files are served from.
    pub cargo_origin: String,
}

impl CspConfig {
    /// Config allowing the host origin.
    #[must_use]
    pub fn new(host_origin: impl Into<String>) -> Self {
        Self {
            host_origin: host_origin.into(),
            allow_host_origin: true,
            cargo_origin: String::new(),
        }
    }

    /// Sets the extension file origin.
    #[must_use]
    pub fn with_cargo_origin(mut self, cargo_origin: impl Into<String>) -> Self {
        self.cargo_origin = cargo_origin.into();
        self
    }

    /// Excludes the host origin from allowed sources.
    #[must_use]
    pub fn without_host_origin(mut self) -> Self {
        self.allow_host_origin = false;
        self
    }
}

// ============================================================================
// SandboxPolicy
// ============================================================================

/// Isolation settings for one extension context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPolicy {
    /// CSP for the sandboxed document.
    pub content_security_policy: String,
    /// Frame `allow` attribute.
    pub iframe_allow: String,
    /// Frame `sandbox` attribute tokens.
    pub sandbox_tokens: Vec<&'static str>,
}

impl SandboxPolicy {
    /// Derives the policy from effective grants.
    #[must_use]
    pub fn from_grants(grants: &GrantSet, config: &CspConfig) -> Self {
        Self {
            content_security_policy: content_security_policy(grants, config),
            iframe_allow: iframe_allow(grants),
            sandbox_tokens: sandbox_tokens(grants),
        }
    }

    /// Returns the `sandbox` attribute value.
    #[inline]
    #[must_use]
    pub fn sandbox_attribute(&self) -> String {
        self.sandbox_tokens.join(" ")
    }

    /// Builds the URL the sandboxed frame loads.
    ///
    /// The entry and CSP travel as percent-encoded query parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `sandbox_origin` is not an absolute URL.
    pub fn launch_url(&self, sandbox_origin: &str, entry: &str) -> Result<Url> {
        let origin = sandbox_origin.trim_end_matches('/');
        let raw = format!(
            "{origin}/runProgram?entry={}&csp={}",
            urlencoding::encode(entry),
            urlencoding::encode(&self.content_security_policy)
        );
        Url::parse(&raw)
            .map_err(|e| Error::config(format!("invalid sandbox origin \"{sandbox_origin}\": {e}")))
    }
}

/// Builds the CSP string.
fn content_security_policy(grants: &GrantSet, config: &CspConfig) -> String {
    let mut sources: Vec<String> = vec!["'self'".to_string()];

    if config.allow_host_origin && !config.host_origin.is_empty() {
        sources.push(config.host_origin.clone());
    }
    if !config.cargo_origin.is_empty() {
        sources.push(config.cargo_origin.clone());
    }

    if grants.is_allowed(CapabilityKey::WebRequest, Some(ALLOW_ALL)) {
        sources.push("*".to_string());
    } else if let Some(origins) = grants.values(CapabilityKey::WebRequest) {
        let mut origins: Vec<&String> = origins.iter().collect();
        origins.sort();
        sources.extend(origins.into_iter().cloned());
    }

    let unsafe_eval = grants.is_allowed(Capability::AllowUnsafeEval, None);
    let unsafe_inline = grants.is_allowed(Capability::AllowInlineContent, None);
    let blobs = grants.is_allowed(Capability::AllowBlobs, None);
    let data_urls = grants.is_allowed(Capability::AllowDataUrls, None);

    if unsafe_eval {
        sources.push("'unsafe-eval'".to_string());
    }
    if unsafe_inline {
        sources.push("'unsafe-inline'".to_string());
    }
    if blobs {
        sources.push("blob:".to_string());
    }
    if data_urls {
        sources.push("data:".to_string());
    }

    let mut worker_sources = vec!["'self'"];
    if blobs {
        worker_sources.push("blob:");
    }

    format!(
        "default-src {}; worker-src {}; frame-src 'self'; {CSP_TAIL}",
        sources.join(" "),
        worker_sources.join(" ")
    )
}

/// Builds the frame `allow` attribute.
fn iframe_allow(grants: &GrantSet) -> String {
    FRAME_FEATURES
        .iter()
        .filter(|(capability, _)| grants.is_allowed(*capability, None))
        .map(|(_, feature)| *feature)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Builds the frame `sandbox` tokens.
fn sandbox_tokens(grants: &GrantSet) -> Vec<&'static str> {
    let mut tokens = vec!["allow-scripts", "allow-same-origin"];
    if grants.is_allowed(Capability::PointerLock, None) {
        tokens.push("allow-pointer-lock");
    }
    tokens
}

// ============================================================================
// Tests
// ============================================================================
