//! Application layer for smart-transport-ws.
//!
//! Knows *what* a served session offers (the built-in handlers) without
//! knowing how connections are accepted or framed.

pub mod handlers;

pub use handlers::{install_builtin_handlers, log_traffic, now_millis, ECHO, TIME};
