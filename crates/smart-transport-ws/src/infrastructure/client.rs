//! Client side: dial a WebSocket URL and get a session back.

use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use smart_transport::{CallError, SmartTransport};
use tokio_tungstenite::connect_async;
use tracing::{debug, info};

use crate::infrastructure::ws_transport::WsTransport;

/// Connects to `url` and opens a session over the new connection.
///
/// # Errors
///
/// Returns an error if the TCP connection or the WebSocket handshake fails.
pub async fn connect(url: &str) -> anyhow::Result<SmartTransport<WsTransport>> {
    let (ws, response) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    debug!("handshake with {url}: HTTP {}", response.status());

    let session = SmartTransport::new(WsTransport::new(ws, url));
    info!("session {} connected to {url}", session.session_id());
    Ok(session)
}

/// Connects, issues one request, closes the connection cleanly and returns
/// the response.
///
/// `limit`, when given, bounds the wait for the response.
///
/// # Errors
///
/// Connection failures, the peer's error response, or an elapsed `limit`.
pub async fn call_once(
    url: &str,
    name: &str,
    req: Value,
    limit: Option<Duration>,
) -> anyhow::Result<Value> {
    let session = connect(url).await?;

    let outcome = match limit {
        Some(limit) => session.call_timeout(name, req, limit).await,
        None => session.call(name, req).await.map_err(CallError::from),
    };

    // Hand the socket back and close it ourselves so the close frame is
    // flushed before returning.
    if let Some(transport) = session.detach() {
        transport.finish(None).await;
    }

    outcome.with_context(|| format!("request {name:?} to {url} failed"))
}
