//! Domain layer for smart-transport-ws.
//!
//! Pure types with no networking: the peer configuration and the
//! close-reason encoding used on the WebSocket close frame.
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or `WebSocket` types
//! - Anything that could block or fail due to external state

pub mod close_reason;
pub mod config;

pub use close_reason::{decode_close_reason, encode_close_reason, MAX_CLOSE_REASON};
pub use config::{ConfigError, PeerConfig};
