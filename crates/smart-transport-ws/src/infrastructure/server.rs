//! WebSocket server: accept loop and one session per connection.
//!
//! 1. Bind a TCP listener on the configured address.
//! 2. Accept connections, each handed to its own Tokio task.
//! 3. Upgrade the connection to WebSocket and wrap it in a
//!    [`SmartTransport`] serving the built-in handlers.
//! 4. Keep the task alive until that session closes.
//! 5. Stop accepting when the `running` flag is cleared.
//!
//! Shutdown is triggered by a shared `AtomicBool` that `main.rs` clears on
//! Ctrl+C.  The accept call uses a short timeout so the flag is checked even
//! when nobody is connecting.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use smart_transport::SmartTransport;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tracing::{error, info, warn};

use crate::application::{install_builtin_handlers, log_traffic};
use crate::domain::PeerConfig;
use crate::infrastructure::ws_transport::WsTransport;

const ACCEPT_POLL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `config.bind_addr` and serves until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound (port in use, missing
/// permission).
pub async fn run_server(config: PeerConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.bind_addr))?;
    serve(listener, running).await
}

/// Runs the accept loop on an already-bound listener.
///
/// Split from [`run_server`] so callers (and tests) can bind port 0 and learn
/// the real address first.
pub async fn serve(listener: TcpListener, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let local = listener
        .local_addr()
        .context("listener has no local address")?;
    info!("st-peer listening on ws://{local}");

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                info!("new connection from {peer_addr}");
                tokio::spawn(handle_connection(stream, peer_addr));
            }
            Ok(Err(e)) => {
                // Transient (e.g. too many open files); keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    Ok(())
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr) {
    match run_connection(stream, peer_addr).await {
        Ok(()) => info!("connection {peer_addr} finished"),
        Err(e) => warn!("connection {peer_addr} failed: {e:#}"),
    }
}

async fn run_connection(stream: TcpStream, peer_addr: SocketAddr) -> anyhow::Result<()> {
    let ws = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let label = peer_addr.to_string();
    let session = SmartTransport::new(WsTransport::new(ws, label.clone()));
    install_builtin_handlers(&session);
    log_traffic(&session, &label);
    info!("session {} serving {label}", session.session_id());

    // Subscribe before checking the state so a close in between is not missed.
    let mut closed = session.closed();
    if session.is_open() {
        if let Some(Some(error)) = closed.recv().await {
            info!("session {} ended with {error}", session.session_id());
        }
    }
    Ok(())
}
