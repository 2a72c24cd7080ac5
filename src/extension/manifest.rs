//! Extension manifest and version parsing.
//!
//! A manifest is JSON:
//!
//! ```json
//! {
//!   "name": "std-ui",
//!   "version": "0.2.0-beta.3",
//!   "entry": "index.js",
//!   "canonicalUrl": "https://mods.example/std-ui/",
//!   "permissions": ["fullScreen", "gameSaves:read,write"]
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};
use crate::permissions::ManifestPermission;

// ============================================================================
// Constants
// ============================================================================

/// Longest accepted version string.
pub const MAX_VERSION_LENGTH: usize = 256;

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:-(prealpha|alpha|beta|rc)(?:\.(\d+))?)?$")
        .expect("version pattern is valid")
});

// ============================================================================
// Stage
// ============================================================================

/// Pre-release stage. Later variants sort higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// `-prealpha`
    Prealpha,
    /// `-alpha`
    Alpha,
    /// `-beta`
    Beta,
    /// `-rc`
    Rc,
    /// No tag.
    Release,
}

impl Stage {
    /// Returns the tag text. Empty for releases.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Prealpha => "prealpha",
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Rc => "rc",
            Self::Release => "",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "prealpha" => Some(Self::Prealpha),
            "alpha" => Some(Self::Alpha),
            "beta" => Some(Self::Beta),
            "rc" => Some(Self::Rc),
            _ => None,
        }
    }
}

// ============================================================================
// SemVer
// ============================================================================

/// `major.minor.patch[-tag[.build]]` version.
///
/// A tag without a build number has build `0`. Ordering compares fields in
/// declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SemVer {
    /// Major version.
    pub major: u64,
    /// Minor version.
    pub minor: u64,
    /// Patch version.
    pub patch: u64,
    /// Pre-release stage.
    pub stage: Stage,
    /// Build within the stage.
    pub build: u64,
}

impl SemVer {
    /// Creates a release version.
    #[inline]
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            stage: Stage::Release,
            build: 0,
        }
    }

    /// Returns `true` for versions without a pre-release tag.
    #[inline]
    #[must_use]
    pub fn is_release(&self) -> bool {
        self.stage == Stage::Release
    }
}

impl FromStr for SemVer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() > MAX_VERSION_LENGTH {
            return Err(Error::manifest(format!(
                "version is longer than {MAX_VERSION_LENGTH} characters"
            )));
        }

        let invalid = || Error::manifest(format!("invalid version \"{s}\""));
        let caps = VERSION_PATTERN.captures(s).ok_or_else(invalid)?;
        let number = |i: usize| -> Result<u64> {
            caps.get(i)
                .map_or(Ok(0), |m| m.as_str().parse::<u64>())
                .map_err(|_| invalid())
        };

        let stage = match caps.get(4) {
            Some(tag) => Stage::from_tag(tag.as_str()).ok_or_else(invalid)?,
            None => Stage::Release,
        };

        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            stage,
            build: number(5)?,
        })
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        match (self.stage, self.build) {
            (Stage::Release, _) => Ok(()),
            (stage, 0) => write!(f, "-{}", stage.as_str()),
            (stage, build) => write!(f, "-{}.{build}", stage.as_str()),
        }
    }
}

impl Serialize for SemVer {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SemVer {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// ExtensionManifest
// ============================================================================

/// Declared identity, entry point and permissions of one extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    /// Display name.
    pub name: String,
    /// Extension version.
    pub version: SemVer,
    /// Entry file, relative to the root URL.
    pub entry: String,
    /// URL the extension is known by.
    pub canonical_url: Url,
    /// URL the files were actually resolved from, if different.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_url: Option<Url>,
    /// Requested permissions.
    #[serde(default)]
    pub permissions: Vec<ManifestPermission>,
    /// Other manifest fields, passed through untouched.
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

impl ExtensionManifest {
    /// Parses and validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] for bad JSON and [`Error::Manifest`] if
    /// validation fails.
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reads, parses and validates a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise as
    /// [`from_json`](Self::from_json).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    /// Checks the manifest for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Manifest`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::manifest("name must not be empty"));
        }
        if self.entry.trim().is_empty() {
            return Err(Error::manifest("entry must not be empty"));
        }
        for url in std::iter::once(&self.canonical_url).chain(self.resolved_url.as_ref()) {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::manifest(format!("\"{url}\" is not an http(s) URL")));
            }
        }
        self.entry_url()?;
        Ok(())
    }

    /// Returns the directory URL files are served from, with a trailing slash.
    #[must_use]
    pub fn root_url(&self) -> Url {
        let mut root = self
            .resolved_url
            .clone()
            .unwrap_or_else(|| self.canonical_url.clone());
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        root.set_query(None);
        root.set_fragment(None);
        root
    }

    /// Resolves the entry file against the root URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Manifest`] if the entry escapes the root.
    pub fn entry_url(&self) -> Result<Url> {
        let root = self.root_url();
        let entry = root.join(&self.entry)?;
        if !entry.as_str().starts_with(root.as_str()) {
            return Err(Error::manifest(format!(
                "entry \"{}\" resolves outside {root}",
                self.entry
            )));
        }
        Ok(entry)
    }

    /// Returns `true` if `url` is served from this extension's root.
    #[must_use]
    pub fn owns_url(&self, url: &str) -> bool {
        let root = self.root_url();
        Url::parse(url).is_ok_and(|url| url.as_str().starts_with(root.as_str()))
    }
}

// ============================================================================
// Tests
// ============================================================================
