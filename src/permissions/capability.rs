//! Capability vocabulary.
//!
//! | Kind | Tags |
//! |------|------|
//! | Bare | `allowAll`, `geoLocation`, `microphone`, `camera`, `displayCapture`, `fullScreen`, `pointerLock`, `allowInlineContent`, `allowUnsafeEval`, `allowDataUrls`, `allowBlobs`, `unlimitedStorage` |
//! | Keyed | `files:{read}`, `gameSaves:{read,write}`, `embedExtensions:{url\|allowAll}`, `webRequest:{origin\|allowAll}` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Value granting every value of a keyed capability.
pub const ALLOW_ALL: &str = "allowAll";

// ============================================================================
// Capability
// ============================================================================

/// Bare capability tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// Every capability, bare and keyed.
    AllowAll,
    /// Geolocation API.
    GeoLocation,
    /// Microphone capture.
    Microphone,
    /// Camera capture.
    Camera,
    /// Screen capture.
    DisplayCapture,
    /// Fullscreen API.
    FullScreen,
    /// Pointer lock API.
    PointerLock,
    /// Inline scripts and styles.
    AllowInlineContent,
    /// `eval` and friends.
    AllowUnsafeEval,
    /// `data:` URLs.
    AllowDataUrls,
    /// `blob:` URLs.
    AllowBlobs,
    /// Persistent storage without quota.
    UnlimitedStorage,
}

impl Capability {
    /// Every bare capability.
    pub const ALL: [Self; 12] = [
        Self::AllowAll,
        Self::GeoLocation,
        Self::Microphone,
        Self::Camera,
        Self::DisplayCapture,
        Self::FullScreen,
        Self::PointerLock,
        Self::AllowInlineContent,
        Self::AllowUnsafeEval,
        Self::AllowDataUrls,
        Self::AllowBlobs,
        Self::UnlimitedStorage,
    ];

    /// Returns the manifest tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AllowAll => "allowAll",
            Self::GeoLocation => "geoLocation",
            Self::Microphone => "microphone",
            Self::Camera => "camera",
            Self::DisplayCapture => "displayCapture",
            Self::FullScreen => "fullScreen",
            Self::PointerLock => "pointerLock",
            Self::AllowInlineContent => "allowInlineContent",
            Self::AllowUnsafeEval => "allowUnsafeEval",
            Self::AllowDataUrls => "allowDataUrls",
            Self::AllowBlobs => "allowBlobs",
            Self::UnlimitedStorage => "unlimitedStorage",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|capability| capability.as_str() == tag)
            .ok_or_else(|| Error::manifest(format!("unknown capability \"{tag}\"")))
    }
}

// ============================================================================
// CapabilityKey
// ============================================================================

/// Keyed capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CapabilityKey {
    /// Files outside the extension's own root.
    Files,
    /// Save-game storage.
    GameSaves,
    /// Embedding other extensions, by canonical URL.
    EmbedExtensions,
    /// Outbound fetch, by origin.
    WebRequest,
}

impl CapabilityKey {
    /// Every keyed capability.
    pub const ALL: [Self; 4] = [
        Self::Files,
        Self::GameSaves,
        Self::EmbedExtensions,
        Self::WebRequest,
    ];

    /// Returns the manifest key.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::GameSaves => "gameSaves",
            Self::EmbedExtensions => "embedExtensions",
            Self::WebRequest => "webRequest",
        }
    }

    /// Closed value set, or `None` when values are open-ended.
    #[must_use]
    pub const fn fixed_options(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::Files => Some(&["read"]),
            Self::GameSaves => Some(&["read", "write"]),
            Self::EmbedExtensions | Self::WebRequest => None,
        }
    }
}

impl fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityKey {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|capability| capability.as_str() == key)
            .ok_or_else(|| Error::manifest(format!("unknown capability key \"{key}\"")))
    }
}

// ============================================================================
// Permission
// ============================================================================

/// What a privileged operation asks the registry for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// A bare capability.
    Flag(Capability),
    /// A keyed capability; the requested value is passed separately.
    Keyed(CapabilityKey),
}

impl From<Capability> for Permission {
    fn from(capability: Capability) -> Self {
        Self::Flag(capability)
    }
}

impl From<CapabilityKey> for Permission {
    fn from(key: CapabilityKey) -> Self {
        Self::Keyed(key)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(capability) => capability.fmt(f),
            Self::Keyed(key) => key.fmt(f),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_tags_round_trip() {
        for capability in Capability::ALL {
            assert_eq!(capability.as_str().parse::<Capability>().ok(), Some(capability));
            let json = serde_json::to_value(capability).expect("serialize");
            assert_eq!(json, capability.as_str());
        }
    }

    #[test]
    fn test_key_round_trip() {
        for key in CapabilityKey::ALL {
            assert_eq!(key.as_str().parse::<CapabilityKey>().ok(), Some(key));
        }
    }

    #[test]
    fn test_unknown_tag() {
        assert!("teleport".parse::<Capability>().is_err());
        assert!("fullscreen".parse::<Capability>().is_err());
    }

    #[test]
    fn test_fixed_options() {
        assert_eq!(CapabilityKey::GameSaves.fixed_options(), Some(&["read", "write"][..]));
        assert!(CapabilityKey::WebRequest.fixed_options().is_none());
    }
}
