//! smart-transport-ws library crate.
//!
//! A WebSocket [`Transport`](smart_transport::Transport) for smart-transport
//! sessions, plus the pieces of the `st-peer` command-line peer.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! [smart-transport-ws]
//!   ├── domain/           PeerConfig, close-reason encoding
//!   ├── application/      Built-in handlers (echo, time), traffic logging
//!   └── infrastructure/
//!         ├── ws_transport/  WsTransport (tokio-tungstenite)
//!         ├── server/        Accept loop, one session per connection
//!         ├── client/        connect(), call_once()
//!         └── config_file/   TOML file loading
//! ```
//!
//! # Layer rules
//!
//! - `domain` does no I/O.
//! - `application` depends on `domain` and `smart-transport` only.
//! - `infrastructure` depends on all other layers plus `tokio` and
//!   `tokio-tungstenite`.

/// Domain layer: configuration and pure encodings.
pub mod domain;

/// Application layer: what a served session offers.
pub mod application;

/// Infrastructure layer: WebSocket transport, server, client, config file.
pub mod infrastructure;

pub use infrastructure::WsTransport;
