//! Built-in request handlers and traffic logging for served sessions.
//!
//! | Name   | Request      | Response                                  |
//! |--------|--------------|-------------------------------------------|
//! | `echo` | any JSON     | the request, unchanged                    |
//! | `time` | ignored      | milliseconds since the Unix epoch (number) |
//!
//! Both are generic over the transport so they can be exercised over the
//! in-process channel transport as well as over WebSocket.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use smart_transport::{SmartTransport, Transport};
use tracing::info;

/// Handler name of the echo service.
pub const ECHO: &str = "echo";

/// Handler name of the clock service.
pub const TIME: &str = "time";

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Registers `echo` and `time` on `session`.
pub fn install_builtin_handlers<T: Transport>(session: &SmartTransport<T>) {
    session.handle(ECHO, |req, responder| responder.ok(req));
    session.handle(TIME, |_req, responder| responder.ok(json!(now_millis())));
}

/// Logs every pass-through message and extension command `session` receives.
pub fn log_traffic<T: Transport>(session: &SmartTransport<T>, peer: &str) {
    let id = session.session_id();
    let label = peer.to_string();
    session.on_message(move |message: &Value| {
        info!("session {id} ({label}): message {message}");
    });
    let label = peer.to_string();
    session.on_command(move |event| {
        info!(
            "session {id} ({label}): command {:?} data={}",
            event.cmd,
            event.data.as_ref().unwrap_or(&serde_json::Value::Null)
        );
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────
