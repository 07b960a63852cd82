//! Infrastructure layer for smart-transport-ws.
//!
//! Everything that touches the network or the file system:
//!
//! - `ws_transport` – [`WsTransport`], the session transport over WebSocket
//! - `server`       – accept loop serving the built-in handlers
//! - `client`       – dialing a URL and one-shot calls
//! - `config_file`  – reading the TOML config from disk

pub mod client;
pub mod config_file;
pub mod server;
pub mod ws_transport;

pub use client::{call_once, connect};
pub use config_file::load_config;
pub use server::{run_server, serve};
pub use ws_transport::WsTransport;
