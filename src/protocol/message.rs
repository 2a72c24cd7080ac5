//! Wire message types.
//!
//! Every message crossing a transport is one of two shapes, tagged by `kind`:
//!
//! ```json
//! { "kind": "request", "id": 3, "method": "getSaveFile", "param": 12 }
//! { "kind": "response", "id": 3, "result": { ... } }
//! { "kind": "response", "id": 3, "error": "permission_denied", "message": "gameSaves:read" }
//! ```
//!
//! Payloads arrive from untrusted contexts as plain JSON values and are
//! validated with [`Message::from_value`] before anything else looks at them.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Message
// ============================================================================

/// Closed union of everything a bridge sends or accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Message {
    /// Call a method declared by the remote table.
    Request(Request),
    /// Answer to an earlier request with the same `id`.
    Response(Response),
}

impl Message {
    /// Validates an untrusted payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] if the value is not a request or response.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::malformed(e.to_string()))
    }

    /// Serializes the message into a transport payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn into_value(self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Returns the correlation ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> RequestId {
        match self {
            Self::Request(request) => request.id,
            Self::Response(response) => response.id,
        }
    }
}

/// What a message that failed validation claimed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Salvaged {
    /// A request; the sender is waiting for an answer.
    Request(RequestId),
    /// A response; a local pending call is waiting for it.
    Response(RequestId),
}

/// Recovers the kind and ID of a message that failed validation.
///
/// Lets the receiver answer a malformed request with an error, or fail the
/// pending call a malformed response points at, instead of leaving either
/// side waiting.
#[must_use]
pub fn salvage_id(value: &Value) -> Option<Salvaged> {
    let object = value.as_object()?;
    let id = object
        .get("id")
        .and_then(Value::as_u64)
        .map(RequestId::from_u64)?;
    match object.get("kind").and_then(Value::as_str)? {
        "request" => Some(Salvaged::Request(id)),
        "response" => Some(Salvaged::Response(id)),
        _ => None,
    }
}

// ============================================================================
// Request
// ============================================================================

/// A method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation ID, unique per sending bridge.
    pub id: RequestId,

    /// Declared method name on the receiving side.
    pub method: String,

    /// Single parameter (`null` for zero-argument methods).
    #[serde(default)]
    pub param: Value,
}

impl Request {
    /// Creates a new request.
    #[inline]
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, param: Value) -> Self {
        Self {
            id,
            method: method.into(),
            param,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// Result of a method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Result data (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error code (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,

    /// Error message (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
            message: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn failure(id: RequestId, fault: RpcFault) -> Self {
        Self {
            id,
            result: None,
            error: Some(fault.code),
            message: Some(fault.message),
        }
    }

    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the result value, returning error if response was error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] carrying the remote error code.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            None => Ok(self.result.unwrap_or(Value::Null)),
            Some(code) => {
                let message = self.message.unwrap_or_else(|| code.to_string());
                Err(Error::remote(code, message))
            }
        }
    }
}

// ============================================================================
// ErrorCode
// ============================================================================

/// Error codes carried in error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Capability not granted.
    PermissionDenied,
    /// Method not declared by the receiver.
    UnknownMethod,
    /// Message or parameter failed validation.
    MalformedMessage,
    /// Receiver is not in a state that accepts this call.
    InvalidState,
    /// Handler failed while executing.
    HandlerFailed,
    /// Receiver is shutting down.
    ContextTerminated,
}

impl ErrorCode {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::UnknownMethod => "unknown_method",
            Self::MalformedMessage => "malformed_message",
            Self::InvalidState => "invalid_state",
            Self::HandlerFailed => "handler_failed",
            Self::ContextTerminated => "context_terminated",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RpcFault
// ============================================================================

/// Error result returned by a handler as data.
///
/// Faults travel back to the caller as an error response; they never
/// unwind through the bridge's message loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcFault {
    /// Machine readable code.
    pub code: ErrorCode,
    /// Human readable detail.
    pub message: String,
}

impl RpcFault {
    /// Creates a fault.
    #[inline]
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Capability was not granted.
    #[inline]
    #[must_use]
    pub fn permission_denied(capability: impl fmt::Display) -> Self {
        Self::new(ErrorCode::PermissionDenied, capability.to_string())
    }

    /// Method is not declared.
    #[inline]
    #[must_use]
    pub fn unknown_method(method: &str) -> Self {
        Self::new(
            ErrorCode::UnknownMethod,
            format!("attempted to call non-existent handler \"{method}\""),
        )
    }

    /// Message or parameter failed validation.
    #[inline]
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedMessage, message)
    }

    /// Call not accepted in the current state.
    #[inline]
    #[must_use]
    pub fn invalid_state(state: impl fmt::Display, method: &str) -> Self {
        Self::new(
            ErrorCode::InvalidState,
            format!("\"{method}\" is not available while {state}"),
        )
    }

    /// Handler failed.
    #[inline]
    #[must_use]
    pub fn handler_failed(method: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::HandlerFailed,
            format!("rpc function \"{method}\" encountered an exception. {reason}"),
        )
    }

    /// Receiver is tearing down.
    #[inline]
    #[must_use]
    pub fn context_terminated() -> Self {
        Self::new(ErrorCode::ContextTerminated, "context terminated")
    }
}

impl fmt::Display for RpcFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<Error> for RpcFault {
    fn from(err: Error) -> Self {
        match err {
            Error::PermissionDenied { capability } => Self::permission_denied(capability),
            Error::UnknownMethod { method } => Self::unknown_method(&method),
            Error::MalformedMessage { message } => Self::malformed(message),
            Error::InvalidState { .. } => Self::new(ErrorCode::InvalidState, err.to_string()),
            Error::ContextTerminated => Self::context_terminated(),
            Error::Remote { code, message } => Self::new(code, message),
            other => Self::new(ErrorCode::HandlerFailed, other.to_string()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let message = Message::Request(Request::new(
            RequestId::from_u64(4),
            "getSaveFile",
            json!(12),
        ));
        let value = message.into_value().expect("serialize");

        assert_eq!(value["kind"], "request");
        assert_eq!(value["id"], 4);
        assert_eq!(value["method"], "getSaveFile");
        assert_eq!(value["param"], 12);
    }

    #[test]
    fn test_request_param_defaults_to_null() {
        let message =
            Message::from_value(json!({"kind": "request", "id": 1, "method": "exit"}))
                .expect("parse");
        match message {
            Message::Request(request) => assert_eq!(request.param, Value::Null),
            Message::Response(_) => panic!("expected request"),
        }
    }

    #[test]
    fn test_error_response_wire_shape() {
        let response = Response::failure(
            RequestId::from_u64(9),
            RpcFault::permission_denied("gameSaves:read"),
        );
        let value = Message::Response(response).into_value().expect("serialize");

        assert_eq!(value["error"], "permission_denied");
        assert_eq!(value["message"], "gameSaves:read");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_into_result_success() {
        let response = Response::success(RequestId::from_u64(1), json!({"value": 42}));
        let result = response.into_result().expect("should succeed");
        assert_eq!(result["value"], 42);
    }

    #[test]
    fn test_into_result_error() {
        let response = Response::failure(RequestId::from_u64(1), RpcFault::unknown_method("nope"));
        let err = response.into_result().unwrap_err();
        assert!(matches!(
            err,
            Error::Remote {
                code: ErrorCode::UnknownMethod,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_untagged_payloads() {
        let cases = [
            json!(null),
            json!("hi"),
            json!(42),
            json!([]),
            json!({"id": 1, "method": "exit"}),
            json!({"kind": "event", "id": 1}),
            json!({"kind": "request", "method": "exit"}),
            json!({"kind": "request", "id": -3, "method": "exit"}),
            json!({"kind": "response", "id": "abc"}),
        ];
        for case in cases {
            let err = Message::from_value(case.clone()).unwrap_err();
            assert!(
                matches!(err, Error::MalformedMessage { .. }),
                "case {case} should be malformed"
            );
        }
    }

    #[test]
    fn test_salvage_id() {
        let bad_method = json!({"kind": "request", "id": 5, "method": 12});
        assert_eq!(salvage_id(&bad_method), Some(Salvaged::Request(RequestId::from_u64(5))));

        let bad_code = json!({"kind": "response", "id": 5, "error": "bogus_code"});
        assert_eq!(salvage_id(&bad_code), Some(Salvaged::Response(RequestId::from_u64(5))));

        assert_eq!(salvage_id(&json!({"kind": "event", "id": 5})), None);
        assert_eq!(salvage_id(&json!({"kind": "request"})), None);
        assert_eq!(salvage_id(&json!("garbage")), None);
    }

    #[test]
    fn test_fault_from_error() {
        let fault = RpcFault::from(Error::permission_denied("files:read"));
        assert_eq!(fault.code, ErrorCode::PermissionDenied);

        let fault = RpcFault::from(Error::config("boom"));
        assert_eq!(fault.code, ErrorCode::HandlerFailed);
    }
}
