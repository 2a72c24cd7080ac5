//! Full extension handshake against an in-process context.
//!
//! Demonstrates:
//! - Building a host with an in-process launcher
//! - The extension side of the handshake via `DaemonClient`
//! - Capability-gated save and file calls
//! - Exiting and shutting down
//!
//! Usage:
//!   cargo run --example handshake
//!   RUST_LOG=extension_host=trace cargo run --example handshake

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use extension_host::providers::CachedFile;
use extension_host::rpc::HandlerTable;
use extension_host::transport::Transport;
use extension_host::{
    Bridge, ControllerOptions, ControllerState, DaemonClient, ExtensionHost, ExtensionManifest,
    HostPolicy, InProcessLauncher, MemoryFileCache,
};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const MANIFEST: &str = r#"{
    "name": "sky-harbor",
    "version": "1.4.0-rc.2",
    "entry": "main.js",
    "canonicalUrl": "https://mods.example/sky-harbor/",
    "permissions": ["fullScreen", "gameSaves:read,write"],
    "author": "Harbor Works"
}"#;

const LEVEL_URL: &str = "https://mods.example/sky-harbor/levels/1.json";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("extension_host=debug")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    println!("=== Extension Handshake ===\n");

    // ========================================================================
    // Create Host
    // ========================================================================

    println!("[1] Creating host...");

    let files = Arc::new(MemoryFileCache::new());
    files.insert(
        LEVEL_URL,
        CachedFile::new("application/json", br#"{"tiles":[1,2,3]}"#.to_vec()),
    );

    let launcher = Arc::new(InProcessLauncher::new(|request, transport| async move {
        println!("    Context launched at {}", request.launch_url);
        if let Err(e) = extension_main(transport).await {
            eprintln!("    [extension] {e:#}");
        }
    }));

    let host = ExtensionHost::builder()
        .launcher(launcher)
        .files(files)
        .policy(HostPolicy::restrictive())
        .options(ControllerOptions::new().with_minimum_load_time(Duration::from_millis(250)))
        .build()?;

    println!("    ✓ Host ready\n");

    // ========================================================================
    // Launch Extension
    // ========================================================================

    println!("[2] Launching extension...");

    let manifest = ExtensionManifest::from_json(MANIFEST)?;
    let controller = host.launch(manifest).await?;
    println!("    ✓ Secure context established ({})", controller.id());

    controller
        .wait_for_state(ControllerState::Running, Duration::from_secs(5))
        .await
        .context("extension never became visible")?;
    println!("    ✓ Extension running\n");

    // ========================================================================
    // Wait For Extension Exit
    // ========================================================================

    println!("[3] Waiting for the extension to exit...");

    controller
        .wait_for_state(ControllerState::Terminated, Duration::from_secs(5))
        .await?;
    println!("    ✓ Extension terminated\n");

    let remaining = host.shutdown().await;
    println!("=== Done ({remaining} extension(s) left at shutdown) ===");
    Ok(())
}

// ============================================================================
// Extension Side
// ============================================================================

/// What a sandboxed extension would run.
async fn extension_main(transport: Transport) -> anyhow::Result<()> {
    let bridge = Bridge::new(transport, Arc::new(HandlerTable::new()));
    let daemon = DaemonClient::new(bridge);

    anyhow::ensure!(daemon.secure_context_established().await?, "handshake refused");

    let state = daemon
        .get_initial_state()
        .await?
        .context("initial state already consumed")?;
    println!("    [extension] root {}", state.root_url);
    println!("    [extension] styles {}", state.recommended_style_sheet_url);

    // Not ready yet: privileged calls are refused.
    if let Err(e) = daemon.create_save().await {
        println!("    [extension] early createSave refused: {e}");
    }

    daemon.ready_for_display().await?;

    let save_id = daemon.create_save().await?;
    let save = daemon.get_save_file(-1).await?.context("no latest save")?;
    println!("    [extension] created save {save_id}, latest is {}", save.id);

    if let Some(level) = daemon.get_file(LEVEL_URL).await? {
        println!(
            "    [extension] loaded level ({} bytes, {})",
            level.body.len(),
            level.content_type
        );
    }

    // Stay on screen past the minimum load time before leaving.
    tokio::time::sleep(Duration::from_millis(500)).await;

    daemon.exit().await?;
    Ok(())
}
