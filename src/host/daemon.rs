//! Host-side handlers for the daemon methods an extension may call.
//!
//! | Method | Gate |
//! |--------|------|
//! | `secureContextEstablished` | `ContextLoading` |
//! | `getInitialState` | once, before `Exiting` |
//! | `readyForDisplay` | `HandshakeInProgress` |
//! | `signalFatalError`, `exit` | any non-terminal state |
//! | `getFile` | `Ready`/`Running`; `files:read` outside the extension root |
//! | `getSaveFile` | `Ready`/`Running`, `gameSaves:read` |
//! | `createSave` | `Ready`/`Running`, `gameSaves:write` |
//! | `reconfigurePermissions` | `Ready`/`Running`, one-shot from `embedExtensions:allowAll` |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures_util::FutureExt;
use futures_util::future;
use serde_json::json;
use tokio::time::{sleep_until, timeout};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::identifiers::SaveId;
use crate::permissions::CapabilityKey;
use crate::protocol::{DaemonMethod, InitialExtensionState, Payload, RpcFault};
use crate::rpc::{HandlerFuture, MethodTable};

use super::controller::{ControllerInner, FATAL_ERROR_MESSAGE};
use super::state::ControllerState;

type Reply = Result<Payload, RpcFault>;

// ============================================================================
// DaemonTable
// ============================================================================

/// Method table the host exposes to one extension.
pub(crate) struct DaemonTable {
    inner: Arc<ControllerInner>,
}

impl DaemonTable {
    pub(crate) fn new(inner: Arc<ControllerInner>) -> Self {
        Self { inner }
    }
}

impl MethodTable for DaemonTable {
    fn methods(&self) -> Vec<&'static str> {
        DaemonMethod::NAMES.to_vec()
    }

    fn call(&self, method: &str, param: Payload) -> HandlerFuture {
        let inner = &self.inner;
        let method = match DaemonMethod::parse(method, param.value) {
            Ok(method) => method,
            Err(fault) => {
                warn!(extension_id = %inner.id, method, error = %fault, "Rejected daemon call");
                return future::ready(Err(fault)).boxed();
            }
        };

        // Checked at dispatch so a call racing the handshake cannot slip in.
        let state = inner.state();
        if method.is_privileged() && !state.accepts_privileged_calls() {
            debug!(extension_id = %inner.id, method = method.name(), %state, "Call before ready");
            return future::ready(Err(RpcFault::invalid_state(state, method.name()))).boxed();
        }

        let inner = Arc::clone(inner);
        async move { dispatch(inner, method).await }.boxed()
    }
}

async fn dispatch(inner: Arc<ControllerInner>, method: DaemonMethod) -> Reply {
    match method {
        DaemonMethod::GetFile { url } => get_file(&inner, &url).await,
        DaemonMethod::GetInitialState => initial_state(&inner),
        DaemonMethod::SecureContextEstablished => Ok(Payload::from(
            inner.transition(ControllerState::HandshakeInProgress),
        )),
        DaemonMethod::SignalFatalError(config) => signal_fatal_error(inner, config.details).await,
        DaemonMethod::ReadyForDisplay => ready_for_display(inner),
        DaemonMethod::Exit => exit(inner).await,
        DaemonMethod::GetSaveFile { id } => get_save_file(&inner, id).await,
        DaemonMethod::CreateSave => create_save(&inner).await,
        DaemonMethod::ReconfigurePermissions(config) => {
            reconfigure_permissions(&inner, config.canonical_urls)
        }
    }
}

/// Logs and converts a capability denial.
fn denied(inner: &ControllerInner, method: &str, err: Error) -> RpcFault {
    warn!(extension_id = %inner.id, method, error = %err, "Capability denied");
    RpcFault::from(err)
}

// ============================================================================
// Handshake
// ============================================================================

fn initial_state(inner: &ControllerInner) -> Reply {
    let state = inner.state();
    if state.is_terminal() || state == ControllerState::Exiting {
        return Err(RpcFault::invalid_state(state, "getInitialState"));
    }
    if inner.initial_state_sent.swap(true, Ordering::AcqRel) {
        debug!(extension_id = %inner.id, "Initial state already sent");
        return Ok(Payload::null());
    }

    let initial = InitialExtensionState {
        configured_permissions: inner.registry.configured(),
        query_state: inner.options.query_state.clone(),
        root_url: inner.manifest.root_url().to_string(),
        recommended_style_sheet_url: inner.options.style_sheet_url(),
    };
    Payload::from_serialize(&initial).map_err(RpcFault::from)
}

/// Answers at once; only showing the frame waits out the minimum load time.
fn ready_for_display(inner: Arc<ControllerInner>) -> Reply {
    if !inner.transition(ControllerState::Ready) {
        return Ok(Payload::from(false));
    }

    let shown_at = *inner.loading_since.lock() + inner.options.minimum_load_time;
    tokio::spawn(async move {
        sleep_until(shown_at).await;

        // Exit or a fatal error may have landed while waiting.
        if inner.state() == ControllerState::Ready {
            inner.services.ui.display_frame(inner.id).await;
            inner.transition(ControllerState::Running);
        }
    });
    Ok(Payload::from(true))
}

// ============================================================================
// Lifecycle
// ============================================================================

async fn signal_fatal_error(inner: Arc<ControllerInner>, details: String) -> Reply {
    if !inner.begin_fatal_error(&details) {
        return Ok(Payload::from(false));
    }
    inner
        .services
        .ui
        .show_fatal_error(inner.id, FATAL_ERROR_MESSAGE, &details)
        .await;

    // Teardown waits for this handler's response to flush, so it runs detached.
    tokio::spawn(async move { inner.teardown().await });
    Ok(Payload::from(true))
}

async fn exit(inner: Arc<ControllerInner>) -> Reply {
    let state = inner.state();
    if state.is_terminal() || state == ControllerState::Exiting {
        return Ok(Payload::from(false));
    }

    let confirm = inner.services.ui.confirm_exit(inner.id);
    let confirmed = timeout(inner.options.exit_timeout, confirm)
        .await
        .unwrap_or_else(|_| {
            warn!(extension_id = %inner.id, "Exit confirmation timed out");
            false
        });
    if !confirmed {
        info!(extension_id = %inner.id, "Exit declined");
        return Ok(Payload::from(false));
    }
    if !inner.transition(ControllerState::Exiting) {
        return Ok(Payload::from(false));
    }

    tokio::spawn(async move {
        inner.teardown().await;
        inner.transition(ControllerState::Terminated);
    });
    Ok(Payload::from(true))
}

// ============================================================================
// Capabilities
// ============================================================================

async fn get_file(inner: &ControllerInner, url: &str) -> Reply {
    if !inner.manifest.owns_url(url) {
        inner
            .registry
            .check(CapabilityKey::Files, Some("read"))
            .map_err(|e| denied(inner, "getFile", e))?;
    }

    match inner.services.files.get_file(url).await {
        Ok(Some(file)) => Ok(file.into_transfer().into_payload()),
        Ok(None) => {
            debug!(extension_id = %inner.id, url, "File not found");
            Ok(Payload::null())
        }
        Err(e) => Err(RpcFault::handler_failed("getFile", e)),
    }
}

async fn get_save_file(inner: &ControllerInner, id: i64) -> Reply {
    inner
        .registry
        .check(CapabilityKey::GameSaves, Some("read"))
        .map_err(|e| denied(inner, "getSaveFile", e))?;

    let saves = &inner.services.saves;
    let record = match SaveId::from_i64(id) {
        Some(id) => saves.get_save_file(id).await,
        None if id < 0 => saves.latest().await,
        None => Ok(None),
    }
    .map_err(|e| RpcFault::handler_failed("getSaveFile", e))?;

    Payload::from_serialize(&record).map_err(RpcFault::from)
}

async fn create_save(inner: &ControllerInner) -> Reply {
    inner
        .registry
        .check(CapabilityKey::GameSaves, Some("write"))
        .map_err(|e| denied(inner, "createSave", e))?;

    let id = inner
        .services
        .saves
        .create_save()
        .await
        .map_err(|e| RpcFault::handler_failed("createSave", e))?;
    info!(extension_id = %inner.id, save_id = id.as_u64(), "Save created");
    Ok(Payload::value(json!(id.as_u64())))
}

fn reconfigure_permissions(inner: &ControllerInner, canonical_urls: Vec<String>) -> Reply {
    if inner.registry.try_self_reconfigure(canonical_urls) {
        return Ok(Payload::from(true));
    }
    Err(denied(
        inner,
        "reconfigurePermissions",
        Error::permission_denied(format!("{}:allowAll", CapabilityKey::EmbedExtensions)),
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::Value;

    use crate::extension::ExtensionManifest;
    use crate::host::controller::{ControllerServices, ExtensionController};
    use crate::host::options::ControllerOptions;
    use crate::permissions::{HostPolicy, PermissionRegistry};
    use crate::protocol::{ErrorCode, FileTransfer};
    use crate::providers::{CachedFile, MemoryFileCache};
    use crate::sandbox::InProcessLauncher;

    const OWN_FILE: &str = "https://mods.example/demo/data/level.json";
    const FOREIGN_FILE: &str = "https://cdn.example/shared/font.woff";

    fn table_for(permissions: Value) -> (ExtensionController, DaemonTable) {
        let manifest = ExtensionManifest::from_json(
            &json!({
                "name": "demo",
                "version": "1.0.0",
                "entry": "index.js",
                "canonicalUrl": "https://mods.example/demo/",
                "permissions": permissions,
            })
            .to_string(),
        )
        .expect("manifest");

        let files = Arc::new(MemoryFileCache::new());
        files.insert(OWN_FILE, CachedFile::new("application/json", b"{}".to_vec()));
        files.insert(FOREIGN_FILE, CachedFile::new("font/woff", b"woff".to_vec()));

        let launcher = Arc::new(InProcessLauncher::new(|_, _| async {}));
        let registry = PermissionRegistry::new(&manifest.permissions, &HostPolicy::permissive());
        let controller = ExtensionController::new(
            manifest,
            registry,
            ControllerServices::new(launcher).with_files(files),
            ControllerOptions::new().with_query_state("slot=2"),
        );
        let table = DaemonTable::new(Arc::clone(&controller.inner));
        (controller, table)
    }

    fn make_ready(table: &DaemonTable) {
        for state in [
            ControllerState::ContextLoading,
            ControllerState::HandshakeInProgress,
            ControllerState::Ready,
        ] {
            assert!(table.inner.transition(state));
        }
    }

    async fn call(table: &DaemonTable, method: &str, param: Value) -> Reply {
        table.call(method, Payload::value(param)).await
    }

    #[tokio::test]
    async fn test_declares_every_method() {
        let (_controller, table) = table_for(json!([]));
        assert_eq!(table.methods().len(), DaemonMethod::NAMES.len());
    }

    #[tokio::test]
    async fn test_malformed_parameter() {
        let (_controller, table) = table_for(json!([]));
        make_ready(&table);

        let fault = call(&table, "getSaveFile", json!("one")).await.unwrap_err();
        assert_eq!(fault.code, ErrorCode::MalformedMessage);
    }

    #[tokio::test]
    async fn test_privileged_calls_wait_for_ready() {
        let (_controller, table) = table_for(json!(["files:read"]));
        assert!(table.inner.transition(ControllerState::ContextLoading));

        let fault = call(&table, "getFile", json!(OWN_FILE)).await.unwrap_err();
        assert_eq!(fault.code, ErrorCode::InvalidState);
    }

    #[tokio::test]
    async fn test_secure_context_only_from_loading() {
        let (_controller, table) = table_for(json!([]));

        let answer = call(&table, "secureContextEstablished", Value::Null).await.expect("call");
        assert_eq!(answer.value, json!(false));

        assert!(table.inner.transition(ControllerState::ContextLoading));
        let answer = call(&table, "secureContextEstablished", Value::Null).await.expect("call");
        assert_eq!(answer.value, json!(true));
        assert_eq!(table.inner.state(), ControllerState::HandshakeInProgress);
    }

    #[tokio::test]
    async fn test_initial_state_carries_options() {
        let (_controller, table) = table_for(json!([]));
        assert!(table.inner.transition(ControllerState::ContextLoading));

        let answer = call(&table, "getInitialState", Value::Null).await.expect("call");
        let state: InitialExtensionState = answer.deserialize().expect("state");
        assert_eq!(state.query_state, "slot=2");
        assert_eq!(state.root_url, "https://mods.example/demo/");

        let again = call(&table, "getInitialState", Value::Null).await.expect("call");
        assert!(again.value.is_null());
    }

    #[tokio::test]
    async fn test_own_files_need_no_grant() {
        let (_controller, table) = table_for(json!([]));
        make_ready(&table);

        let answer = call(&table, "getFile", json!(OWN_FILE)).await.expect("call");
        let file = FileTransfer::from_payload(answer).expect("transfer").expect("file");
        assert_eq!(file.content_type, "application/json");
        assert_eq!(file.body, b"{}");

        let fault = call(&table, "getFile", json!(FOREIGN_FILE)).await.unwrap_err();
        assert_eq!(fault.code, ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn test_foreign_files_with_grant() {
        let (_controller, table) = table_for(json!(["files:read"]));
        make_ready(&table);

        let answer = call(&table, "getFile", json!(FOREIGN_FILE)).await.expect("call");
        let file = FileTransfer::from_payload(answer).expect("transfer").expect("file");
        assert_eq!(file.body, b"woff");

        let missing = call(&table, "getFile", json!("https://cdn.example/none")).await.expect("call");
        assert!(missing.value.is_null());
    }

    #[tokio::test]
    async fn test_self_reconfiguration_is_one_shot() {
        let (controller, table) = table_for(json!(["embedExtensions:allowAll"]));
        make_ready(&table);

        let param = json!({ "canonicalUrls": ["https://a.example/"] });
        let answer = call(&table, "reconfigurePermissions", param.clone()).await.expect("call");
        assert_eq!(answer.value, json!(true));
        assert!(controller.registry().configured());
        assert!(controller.registry().is_allowed(
            CapabilityKey::EmbedExtensions,
            Some("https://a.example/")
        ));
        assert!(!controller.registry().is_allowed(
            CapabilityKey::EmbedExtensions,
            Some("https://b.example/")
        ));

        let fault = call(&table, "reconfigurePermissions", param).await.unwrap_err();
        assert_eq!(fault.code, ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn test_self_reconfiguration_needs_allow_all() {
        let (_controller, table) = table_for(json!(["embedExtensions:https://a.example/"]));
        make_ready(&table);

        let param = json!({ "canonicalUrls": ["https://b.example/"] });
        let fault = call(&table, "reconfigurePermissions", param).await.unwrap_err();
        assert_eq!(fault.code, ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn test_ready_for_display_outside_handshake() {
        let (_controller, table) = table_for(json!([]));
        let answer = call(&table, "readyForDisplay", Value::Null).await.expect("call");
        assert_eq!(answer.value, json!(false));
        assert_eq!(table.inner.state(), ControllerState::Created);
    }

    #[tokio::test]
    async fn test_lifecycle_calls_after_termination() {
        let (controller, table) = table_for(json!([]));
        assert!(controller.exit().await.expect("exit"));

        let answer = call(&table, "exit", Value::Null).await.expect("call");
        assert_eq!(answer.value, json!(false));
        let answer = call(&table, "signalFatalError", json!({ "details": "late" }))
            .await
            .expect("call");
        assert_eq!(answer.value, json!(false));
        assert!(call(&table, "getInitialState", Value::Null).await.is_err());
    }
}
