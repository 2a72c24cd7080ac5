//! WebSocket server for out-of-process extension contexts.
//!
//! # Connection Flow
//!
//! 1. Host binds a WebSocket server to `localhost:0` (random port)
//! 2. Host launches the sandboxed process with the WebSocket URL
//! 3. The sandboxed process connects with [`connect`]
//! 4. Both ends hold a [`Transport`]; the RPC handshake runs on top

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::Transport;
use super::connection::websocket;

// ============================================================================
// Constants
// ============================================================================

/// Default time to wait for the sandboxed process to connect.
const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// PendingServer
// ============================================================================

/// A WebSocket server that is bound but not yet connected.
///
/// # Example
///
/// ```ignore
/// use std::net::{IpAddr, Ipv4Addr};
/// use extension_host::transport::PendingServer;
///
/// let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
/// let ws_url = server.ws_url();
///
/// // Launch the sandboxed process with ws_url...
///
/// let transport = server.accept().await?;
/// ```
pub struct PendingServer {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Port the server is bound to.
    port: u16,
    /// Maximum wait in [`accept`](Self::accept).
    accept_timeout: Duration,
}

impl PendingServer {
    /// Binds a WebSocket server to the specified address and port.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        debug!(port = actual_port, "WebSocket server bound");

        Ok(Self {
            listener,
            port: actual_port,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
        })
    }

    /// Overrides how long [`accept`](Self::accept) waits.
    #[must_use]
    pub fn with_accept_timeout(mut self, accept_timeout: Duration) -> Self {
        self.accept_timeout = accept_timeout;
        self
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the WebSocket URL for this server.
    ///
    /// Format: `ws://127.0.0.1:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Returns the local socket address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.port)
    }

    /// Accepts one connection and upgrades it to a WebSocket transport.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if nothing connects in time
    /// - [`Error::Connection`] if the WebSocket upgrade fails
    pub async fn accept(self) -> Result<Transport> {
        let accept_result = timeout(self.accept_timeout, self.listener.accept()).await;

        let (stream, addr) = accept_result.map_err(|_| {
            Error::connection_timeout(self.accept_timeout.as_millis() as u64)
        })??;

        debug!(?addr, "TCP connection accepted");

        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        info!(port = self.port, "WebSocket connection established");

        Ok(websocket(ws_stream))
    }
}

// ============================================================================
// connect
// ============================================================================

/// Connects to a host's [`PendingServer`] from the sandboxed side.
///
/// # Errors
///
/// Returns [`Error::Connection`] if the connection or upgrade fails.
pub async fn connect(ws_url: &str) -> Result<Transport> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .map_err(|e| Error::connection(format!("WebSocket connect to {ws_url} failed: {e}")))?;

    debug!(%ws_url, "WebSocket connected");

    Ok(websocket(ws_stream))
}

// ============================================================================
// Tests
// ============================================================================
