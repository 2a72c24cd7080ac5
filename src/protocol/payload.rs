//! Call payloads and handshake data shapes.
//!
//! Binary data never rides inside the JSON value. It is moved out-of-band as
//! a list of [`Transferable`] buffers next to the message, and the value
//! refers to it by position.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};

// ============================================================================
// Transferable
// ============================================================================

/// An owned binary buffer moved (not copied) to the other side.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Transferable(Vec<u8>);

impl Transferable {
    /// Wraps a buffer.
    #[inline]
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the buffer length.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the buffer is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Takes ownership of the bytes.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for Transferable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transferable({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Transferable {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

// ============================================================================
// Payload
// ============================================================================

/// A value plus the buffers that travel with it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    /// Structured part of the payload.
    pub value: Value,
    /// Binary buffers moved alongside the value.
    pub transferables: Vec<Transferable>,
}

impl Payload {
    /// Payload with no buffers.
    #[inline]
    #[must_use]
    pub fn value(value: Value) -> Self {
        Self {
            value,
            transferables: Vec::new(),
        }
    }

    /// Payload with buffers.
    #[inline]
    #[must_use]
    pub fn transfer(value: Value, transferables: Vec<Transferable>) -> Self {
        Self {
            value,
            transferables,
        }
    }

    /// `null` payload.
    #[inline]
    #[must_use]
    pub fn null() -> Self {
        Self::value(Value::Null)
    }

    /// Serializes `data` into a payload with no buffers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn from_serialize<T: Serialize>(data: &T) -> Result<Self> {
        Ok(Self::value(serde_json::to_value(data)?))
    }

    /// Deserializes the structured part.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the value does not match `T`.
    pub fn deserialize<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

impl From<bool> for Payload {
    fn from(flag: bool) -> Self {
        Self::value(Value::Bool(flag))
    }
}

// ============================================================================
// FileTransfer
// ============================================================================

/// A file handed to an extension.
///
/// On the wire the value is `{ "type": ..., "length": ..., "body": 0 }` and
/// the body is transferable number `0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransfer {
    /// MIME type of the body.
    pub content_type: String,
    /// Declared length in bytes.
    pub length: u64,
    /// File contents.
    pub body: Vec<u8>,
}

impl FileTransfer {
    /// Converts into a payload, moving the body out-of-band.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        Payload::transfer(
            json!({ "type": self.content_type, "length": self.length, "body": 0 }),
            vec![Transferable::new(self.body)],
        )
    }

    /// Rebuilds a transfer from a received payload.
    ///
    /// A `null` value means the file was not found.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the value or buffer list is malformed.
    pub fn from_payload(payload: Payload) -> Result<Option<Self>> {
        if payload.value.is_null() {
            return Ok(None);
        }

        let content_type = payload
            .value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("file transfer missing \"type\""))?
            .to_string();
        let length = payload
            .value
            .get("length")
            .and_then(Value::as_u64)
            .unwrap_or_default();
        let index = payload
            .value
            .get("body")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize;

        let body = payload
            .transferables
            .into_iter()
            .nth(index)
            .ok_or_else(|| Error::protocol("file transfer body was not transferred"))?
            .into_inner();

        Ok(Some(Self {
            content_type,
            length,
            body,
        }))
    }
}

// ============================================================================
// InitialExtensionState
// ============================================================================

/// Handshake payload produced once by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialExtensionState {
    /// Whether permission negotiation already completed.
    pub configured_permissions: bool,
    /// Opaque string passed through from the launch URL.
    pub query_state: String,
    /// Root URL the extension was resolved from.
    pub root_url: String,
    /// Absolute URL of the host's recommended stylesheet.
    pub recommended_style_sheet_url: String,
}

// ============================================================================
// Method Parameters
// ============================================================================

/// Parameter of `signalFatalError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalErrorConfig {
    /// Details surfaced to the embedding UI.
    pub details: String,
}

/// Parameter of `reconfigurePermissions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconfigurationConfig {
    /// Canonical URLs the extension may embed from now on.
    pub canonical_urls: Vec<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_transfer_moves_body_out_of_band() {
        let file = FileTransfer {
            content_type: "text/javascript".into(),
            length: 5,
            body: b"hello".to_vec(),
        };
        let payload = file.clone().into_payload();

        assert_eq!(payload.transferables.len(), 1);
        assert!(payload.value.get("body").and_then(Value::as_str).is_none());

        let rebuilt = FileTransfer::from_payload(payload).expect("parse");
        assert_eq!(rebuilt, Some(file));
    }

    #[test]
    fn test_file_transfer_null_is_not_found() {
        let rebuilt = FileTransfer::from_payload(Payload::null()).expect("parse");
        assert!(rebuilt.is_none());
    }

    #[test]
    fn test_file_transfer_missing_buffer() {
        let payload = Payload::value(json!({"type": "text/plain", "length": 3, "body": 0}));
        assert!(FileTransfer::from_payload(payload).is_err());
    }

    #[test]
    fn test_initial_state_is_camel_case() {
        let state = InitialExtensionState {
            configured_permissions: false,
            query_state: "q=1".into(),
            root_url: "https://mods.example/game/".into(),
            recommended_style_sheet_url: "https://host.example/styles.css".into(),
        };
        let value = serde_json::to_value(&state).expect("serialize");
        assert_eq!(value["configuredPermissions"], false);
        assert_eq!(value["recommendedStyleSheetUrl"], "https://host.example/styles.css");
    }

    #[test]
    fn test_transferable_debug_hides_bytes() {
        let buffer = Transferable::new(vec![0; 64]);
        assert_eq!(format!("{buffer:?}"), "Transferable(64 bytes)");
    }
}
