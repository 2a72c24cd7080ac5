//! Typed method table exposed by the host daemon to an extension.
//!
//! | Method | Param | Result |
//! |--------|-------|--------|
//! | `getFile` | `string` | `FileTransfer \| null` |
//! | `getInitialState` | `null` | `InitialExtensionState \| null` |
//! | `secureContextEstablished` | `null` | `boolean` |
//! | `signalFatalError` | `{details}` | `boolean` |
//! | `readyForDisplay` | `null` | `boolean` |
//! | `exit` | `null` | `boolean` |
//! | `getSaveFile` | `number` | `SaveRecord \| null` |
//! | `createSave` | `null` | `number` |
//! | `reconfigurePermissions` | `{canonicalUrls}` | `boolean` |

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Value, json};

use super::message::RpcFault;
use super::payload::{FatalErrorConfig, ReconfigurationConfig};

// ============================================================================
// DaemonMethod
// ============================================================================

/// One variant per declared daemon method, carrying its validated parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonMethod {
    /// Fetch a file through the host's artifact cache.
    GetFile {
        /// Requested URL.
        url: String,
    },
    /// Receive the handshake payload.
    GetInitialState,
    /// Report that the sandbox finished establishing its secure context.
    SecureContextEstablished,
    /// Report an unrecoverable error.
    SignalFatalError(FatalErrorConfig),
    /// Ask the host to show the extension.
    ReadyForDisplay,
    /// Ask the host to close the extension.
    Exit,
    /// Read a save record. Negative IDs select the latest save.
    GetSaveFile {
        /// Requested save ID.
        id: i64,
    },
    /// Allocate a new save record.
    CreateSave,
    /// Narrow the `embedExtensions` scope.
    ReconfigurePermissions(ReconfigurationConfig),
}

impl DaemonMethod {
    /// Every method name the daemon declares.
    pub const NAMES: &'static [&'static str] = &[
        "getFile",
        "getInitialState",
        "secureContextEstablished",
        "signalFatalError",
        "readyForDisplay",
        "exit",
        "getSaveFile",
        "createSave",
        "reconfigurePermissions",
    ];

    /// Parses an inbound call into its typed form.
    ///
    /// Zero-argument methods ignore whatever parameter was sent.
    ///
    /// # Errors
    ///
    /// Returns an `unknown_method` fault for undeclared names and a
    /// `malformed_message` fault for parameters of the wrong shape.
    pub fn parse(method: &str, param: Value) -> Result<Self, RpcFault> {
        let parsed = match method {
            "getFile" => match param {
                Value::String(url) => Self::GetFile { url },
                other => return Err(expected(method, "a string url", &other)),
            },
            "getInitialState" => Self::GetInitialState,
            "secureContextEstablished" => Self::SecureContextEstablished,
            "signalFatalError" => Self::SignalFatalError(
                serde_json::from_value(param.clone())
                    .map_err(|_| expected(method, "{details: string}", &param))?,
            ),
            "readyForDisplay" => Self::ReadyForDisplay,
            "exit" => Self::Exit,
            "getSaveFile" => match param.as_i64() {
                Some(id) => Self::GetSaveFile { id },
                None => return Err(expected(method, "an integer id", &param)),
            },
            "createSave" => Self::CreateSave,
            "reconfigurePermissions" => Self::ReconfigurePermissions(
                serde_json::from_value(param.clone())
                    .map_err(|_| expected(method, "{canonicalUrls: string[]}", &param))?,
            ),
            unknown => return Err(RpcFault::unknown_method(unknown)),
        };
        Ok(parsed)
    }

    /// Returns the wire method name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GetFile { .. } => "getFile",
            Self::GetInitialState => "getInitialState",
            Self::SecureContextEstablished => "secureContextEstablished",
            Self::SignalFatalError(_) => "signalFatalError",
            Self::ReadyForDisplay => "readyForDisplay",
            Self::Exit => "exit",
            Self::GetSaveFile { .. } => "getSaveFile",
            Self::CreateSave => "createSave",
            Self::ReconfigurePermissions(_) => "reconfigurePermissions",
        }
    }

    /// Returns the wire parameter.
    #[must_use]
    pub fn param(&self) -> Value {
        match self {
            Self::GetFile { url } => Value::String(url.clone()),
            Self::SignalFatalError(config) => json!({ "details": config.details }),
            Self::GetSaveFile { id } => json!(id),
            Self::ReconfigurePermissions(config) => {
                json!({ "canonicalUrls": config.canonical_urls })
            }
            Self::GetInitialState
            | Self::SecureContextEstablished
            | Self::ReadyForDisplay
            | Self::Exit
            | Self::CreateSave => Value::Null,
        }
    }

    /// Returns `true` for calls that touch host capabilities and so need `Ready`.
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        matches!(
            self,
            Self::GetFile { .. }
                | Self::GetSaveFile { .. }
                | Self::CreateSave
                | Self::ReconfigurePermissions(_)
        )
    }
}

/// Builds a malformed-parameter fault.
fn expected(method: &str, shape: &str, got: &Value) -> RpcFault {
    RpcFault::malformed(format!(
        "\"{method}\" expects {shape}, got {}",
        type_name(got)
    ))
}

/// Short JSON type name for diagnostics.
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Tests
// ============================================================================
