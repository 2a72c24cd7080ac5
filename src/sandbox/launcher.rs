//! Creating and destroying isolated extension contexts.
//!
//! The controller never knows how a context is hosted. It asks a
//! [`ContextLauncher`] for a [`Transport`] to a fresh context and later
//! tells it to destroy that context.
//!
//! | Launcher | Context |
//! |----------|---------|
//! | [`InProcessLauncher`] | A tokio task in this process |
//! | [`SocketLauncher`] | Anything that connects back over WebSocket |

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use crate::error::Result;
use crate::extension::ExtensionManifest;
use crate::identifiers::ExtensionId;
use crate::transport::{self, PendingServer, Transport};

use super::policy::SandboxPolicy;

// ============================================================================
// SandboxRequest
// ============================================================================

/// Everything a launcher needs to create one context.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    /// Identity of the extension instance.
    pub extension_id: ExtensionId,
    /// Manifest being launched.
    pub manifest: Arc<ExtensionManifest>,
    /// Isolation settings.
    pub policy: SandboxPolicy,
    /// URL the context loads.
    pub launch_url: Url,
}

// ============================================================================
// ContextLauncher
// ============================================================================

/// Host-side factory for isolated contexts.
#[async_trait]
pub trait ContextLauncher: Send + Sync + 'static {
    /// Creates a context and returns the host end of its transport.
    async fn launch(&self, request: &SandboxRequest) -> Result<Transport>;

    /// Forcibly destroys a context. Unknown IDs are ignored.
    async fn destroy(&self, extension_id: ExtensionId);
}

// ============================================================================
// InProcessLauncher
// ============================================================================

/// Extension body run by [`InProcessLauncher`].
type ContextFn = Arc<dyn Fn(SandboxRequest, Transport) -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs each context as a tokio task over an in-process transport pair.
///
/// Destroying a context aborts its task, which drops the extension end of
/// the transport.
pub struct InProcessLauncher {
    context: ContextFn,
    tasks: Mutex<FxHashMap<ExtensionId, JoinHandle<()>>>,
}

impl InProcessLauncher {
    /// Creates a launcher that runs `context` for every launch.
    pub fn new<F, Fut>(context: F) -> Self
    where
        F: Fn(SandboxRequest, Transport) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            context: Arc::new(move |request, transport| context(request, transport).boxed()),
            tasks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Returns the number of contexts whose task is still running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.tasks
            .lock()
            .values()
            .filter(|task| !task.is_finished())
            .count()
    }
}

#[async_trait]
impl ContextLauncher for InProcessLauncher {
    async fn launch(&self, request: &SandboxRequest) -> Result<Transport> {
        let (host_end, extension_end) = transport::pair();
        let task = tokio::spawn((self.context)(request.clone(), extension_end));

        if let Some(previous) = self.tasks.lock().insert(request.extension_id, task) {
            previous.abort();
        }

        debug!(extension_id = %request.extension_id, "In-process context launched");
        Ok(host_end)
    }

    async fn destroy(&self, extension_id: ExtensionId) {
        let task = self.tasks.lock().remove(&extension_id);
        if let Some(task) = task {
            task.abort();
            debug!(%extension_id, "In-process context destroyed");
        }
    }
}

// ============================================================================
// SocketLauncher
// ============================================================================

/// Starts the out-of-process context given the URL it must connect to.
type SpawnHook = Box<dyn Fn(&SandboxRequest, &str) -> Result<()> + Send + Sync>;

/// Binds a one-shot WebSocket server per launch and waits for the context
/// to connect.
pub struct SocketLauncher {
    bind_ip: IpAddr,
    accept_timeout: Duration,
    spawn: SpawnHook,
}

impl SocketLauncher {
    /// Creates a launcher that calls `spawn` with each context's WebSocket URL.
    pub fn new<F>(spawn: F) -> Self
    where
        F: Fn(&SandboxRequest, &str) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            accept_timeout: Duration::from_secs(30),
            spawn: Box::new(spawn),
        }
    }

    /// Overrides how long a launched context has to connect.
    #[must_use]
    pub fn with_accept_timeout(mut self, accept_timeout: Duration) -> Self {
        self.accept_timeout = accept_timeout;
        self
    }
}

#[async_trait]
impl ContextLauncher for SocketLauncher {
    async fn launch(&self, request: &SandboxRequest) -> Result<Transport> {
        let server = PendingServer::bind(self.bind_ip, 0)
            .await?
            .with_accept_timeout(self.accept_timeout);

        (self.spawn)(request, &server.ws_url())?;
        server.accept().await
    }

    async fn destroy(&self, extension_id: ExtensionId) {
        // The socket closes with the bridge; the remote process owns its own exit.
        debug!(%extension_id, "Socket context released");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::extension::ExtensionManifest;
    use crate::permissions::GrantSet;
    use crate::sandbox::CspConfig;

    fn request() -> SandboxRequest {
        let manifest = ExtensionManifest::from_json(
            r#"{"name":"demo","version":"1.0.0","entry":"index.js","canonicalUrl":"https://mods.example/demo/"}"#,
        )
        .expect("manifest");
        let policy = SandboxPolicy::from_grants(&GrantSet::default(), &CspConfig::default());
        let launch_url = policy
            .launch_url("https://sandbox.example", "https://mods.example/demo/index.js")
            .expect("url");
        SandboxRequest {
            extension_id: ExtensionId::generate(),
            manifest: Arc::new(manifest),
            policy,
            launch_url,
        }
    }

    #[tokio::test]
    async fn test_in_process_launch_and_destroy() {
        let launcher = InProcessLauncher::new(|_, mut transport: Transport| async move {
            while let Some(envelope) = transport.recv().await {
                let _ = transport.send(envelope.payload, envelope.transferables);
            }
        });
        let request = request();

        let mut host = launcher.launch(&request).await.expect("launch");
        host.send(json!("ping"), Vec::new()).expect("send");
        assert_eq!(host.recv().await.map(|e| e.payload), Some(json!("ping")));
        assert_eq!(launcher.running(), 1);

        launcher.destroy(request.extension_id).await;
        assert!(host.recv().await.is_none());
        assert_eq!(launcher.running(), 0);
    }

    #[tokio::test]
    async fn test_socket_launch_connects_back() {
        let launcher = SocketLauncher::new(|_, ws_url| {
            let ws_url = ws_url.to_string();
            tokio::spawn(async move {
                if let Ok(mut transport) = transport::connect(&ws_url).await {
                    transport.send(json!("hello"), Vec::new()).ok();
                    while transport.recv().await.is_some() {}
                }
            });
            Ok(())
        });

        let mut host = launcher.launch(&request()).await.expect("launch");
        assert_eq!(host.recv().await.map(|e| e.payload), Some(json!("hello")));
    }

    #[tokio::test]
    async fn test_socket_launch_times_out() {
        let launcher =
            SocketLauncher::new(|_, _| Ok(())).with_accept_timeout(Duration::from_millis(20));
        let err = launcher.launch(&request()).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
