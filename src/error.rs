//! Error types for the extension host.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use extension_host::{Result, Error};
//!
//! async fn example(client: &DaemonClient) -> Result<()> {
//!     let state = client.get_initial_state().await?;
//!     client.ready_for_display().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::Manifest`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::ContextTerminated`] |
//! | Protocol | [`Error::UnknownMethod`], [`Error::MalformedMessage`], [`Error::Protocol`], [`Error::Remote`] |
//! | Permission | [`Error::PermissionDenied`] |
//! | Lifecycle | [`Error::HandshakeTimeout`], [`Error::InvalidState`], [`Error::ExtensionNotFound`] |
//! | Execution | [`Error::Timeout`], [`Error::RequestTimeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{ExtensionId, RequestId};
use crate::protocol::ErrorCode;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when host or controller configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Extension manifest is invalid.
    #[error("Invalid manifest: {message}")]
    Manifest {
        /// Description of the manifest problem.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport could not be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Timed out waiting for an isolated context to connect.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The transport closed while the call was pending.
    ///
    /// Returned to every pending call when the remote context goes away.
    #[error("Channel closed")]
    ConnectionClosed,

    /// The owning controller tore the context down.
    ///
    /// Returned to every pending call on exit or fatal error.
    #[error("Context terminated")]
    ContextTerminated,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Method is not declared by the receiving side's table.
    #[error("Unknown method: {method}")]
    UnknownMethod {
        /// The unrecognized method name.
        method: String,
    },

    /// Inbound payload did not match the wire format.
    #[error("Malformed message: {message}")]
    MalformedMessage {
        /// Description of the parse failure.
        message: String,
    },

    /// Protocol violation.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// The remote side answered a call with an error result.
    #[error("Remote error ({code}): {message}")]
    Remote {
        /// Error code reported by the remote handler.
        code: ErrorCode,
        /// Human readable message reported by the remote handler.
        message: String,
    },

    // ========================================================================
    // Permission Errors
    // ========================================================================
    /// Capability was not granted to the extension.
    #[error("Permission denied: {capability}")]
    PermissionDenied {
        /// Capability (and value, if keyed) that was requested.
        capability: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Context never reported a secure context within the handshake bound.
    #[error("Handshake timed out after {timeout_ms}ms")]
    HandshakeTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Operation is not valid in the controller's current state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Current controller state.
        state: String,
        /// Operation that was attempted.
        operation: String,
    },

    /// No extension with this ID is loaded.
    #[error("Extension not found: {extension_id}")]
    ExtensionNotFound {
        /// The missing extension ID.
        extension_id: ExtensionId,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// RPC call exceeded the caller's deadline.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a manifest error.
    #[inline]
    pub fn manifest(message: impl Into<String>) -> Self {
        Self::Manifest {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates an unknown method error.
    #[inline]
    pub fn unknown_method(method: impl Into<String>) -> Self {
        Self::UnknownMethod {
            method: method.into(),
        }
    }

    /// Creates a malformed message error.
    #[inline]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMessage {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a remote error from a fault code and message.
    #[inline]
    pub fn remote(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// Creates a permission denied error.
    #[inline]
    pub fn permission_denied(capability: impl Into<String>) -> Self {
        Self::PermissionDenied {
            capability: capability.into(),
        }
    }

    /// Creates a handshake timeout error.
    #[inline]
    pub fn handshake_timeout(timeout_ms: u64) -> Self {
        Self::HandshakeTimeout { timeout_ms }
    }

    /// Creates an invalid state error.
    #[inline]
    pub fn invalid_state(state: impl ToString, operation: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.to_string(),
            operation: operation.into(),
        }
    }

    /// Creates an extension not found error.
    #[inline]
    pub fn extension_not_found(extension_id: ExtensionId) -> Self {
        Self::ExtensionNotFound { extension_id }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::HandshakeTimeout { .. }
                | Self::Timeout { .. }
                | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this error means the channel is gone.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::ContextTerminated
                | Self::ChannelClosed(_)
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the remote side (or the local registry) denied a capability.
    #[inline]
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. }
                | Self::Remote {
                    code: ErrorCode::PermissionDenied,
                    ..
                }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors leave the channel usable; the call may be retried.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::RequestTimeout { .. }
                | Self::Remote { .. }
                | Self::PermissionDenied { .. }
                | Self::UnknownMethod { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("failed to connect");
        assert_eq!(err.to_string(), "Connection failed: failed to connect");
    }

    #[test]
    fn test_closed_display() {
        assert_eq!(Error::ConnectionClosed.to_string(), "Channel closed");
        assert_eq!(Error::ContextTerminated.to_string(), "Context terminated");
    }

    #[test]
    fn test_invalid_state_display() {
        let err = Error::invalid_state("HandshakeInProgress", "getSaveFile");
        assert_eq!(err.to_string(), "Cannot getSaveFile while HandshakeInProgress");
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::handshake_timeout(5000).is_timeout());
        assert!(Error::connection_timeout(5000).is_timeout());
        assert!(!Error::connection("test").is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::ContextTerminated.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_permission_denied() {
        assert!(Error::permission_denied("files:read").is_permission_denied());
        assert!(Error::remote(ErrorCode::PermissionDenied, "nope").is_permission_denied());
        assert!(!Error::remote(ErrorCode::UnknownMethod, "nope").is_permission_denied());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::remote(ErrorCode::UnknownMethod, "x").is_recoverable());
        assert!(!Error::ConnectionClosed.is_recoverable());
        assert!(!Error::config("test").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
