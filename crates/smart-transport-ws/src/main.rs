//! st-peer: a command-line smart-transport peer over WebSocket.
//!
//! # Usage
//!
//! ```text
//! st-peer [--config <FILE>] [--log-level <LEVEL>] <COMMAND>
//!
//! Commands:
//!   serve  Accept connections and serve the built-in handlers (echo, time)
//!   call   Connect, send one request and print the JSON result
//!
//! st-peer serve [--bind <ADDR>]
//! st-peer call  [--url <URL>] [--timeout-ms <MS>] <NAME> [REQ_JSON]
//! ```
//!
//! # Configuration precedence
//!
//! Command-line flag > environment variable > config file > built-in default.
//!
//! | Variable             | Flag           | Default               |
//! |----------------------|----------------|-----------------------|
//! | `ST_CONFIG`          | `--config`     | none                  |
//! | `ST_LOG_LEVEL`       | `--log-level`  | `info`                |
//! | `ST_BIND`            | `--bind`       | `127.0.0.1:9300`      |
//! | `ST_URL`             | `--url`        | `ws://127.0.0.1:9300` |
//! | `ST_CALL_TIMEOUT_MS` | `--timeout-ms` | none                  |
//!
//! `RUST_LOG`, when set, overrides the log level entirely.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use smart_transport_ws::domain::PeerConfig;
use smart_transport_ws::infrastructure::{call_once, load_config, run_server};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Command-line smart-transport peer over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "st-peer", version)]
struct Cli {
    /// TOML config file; flags and environment variables override its values.
    #[arg(long, global = true, env = "ST_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set (e.g. `debug`).
    #[arg(long, global = true, env = "ST_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accept WebSocket connections and serve `echo` and `time`.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "ST_BIND")]
        bind: Option<SocketAddr>,
    },

    /// Send one request and print the JSON result.
    Call {
        /// Handler name on the remote peer.
        name: String,

        /// Request payload as JSON.
        #[arg(default_value = "null")]
        req: String,

        /// WebSocket URL of the remote peer.
        #[arg(long, env = "ST_URL")]
        url: Option<String>,

        /// Give up after this many milliseconds.
        #[arg(long, env = "ST_CALL_TIMEOUT_MS")]
        timeout_ms: Option<u64>,
    },
}

impl Cli {
    /// Layers the flags over `base` (the config file or the defaults).
    fn apply_to(&self, mut base: PeerConfig) -> PeerConfig {
        if let Some(level) = &self.log_level {
            base.log_level = level.clone();
        }
        match &self.command {
            Command::Serve { bind } => {
                if let Some(bind) = bind {
                    base.bind_addr = *bind;
                }
            }
            Command::Call {
                url, timeout_ms, ..
            } => {
                if let Some(url) = url {
                    base.url = url.clone();
                }
                if timeout_ms.is_some() {
                    base.call_timeout_ms = *timeout_ms;
                }
            }
        }
        base
    }

    fn resolve_config(&self) -> anyhow::Result<PeerConfig> {
        let base = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => PeerConfig::default(),
        };
        Ok(self.apply_to(base))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    match cli.command {
        Command::Serve { .. } => serve(config).await,
        Command::Call { name, req, .. } => call(config, &name, &req).await,
    }
}

async fn serve(config: PeerConfig) -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;
    info!("st-peer stopped");
    Ok(())
}

async fn call(config: PeerConfig, name: &str, req: &str) -> anyhow::Result<()> {
    let req: Value =
        serde_json::from_str(req).with_context(|| format!("request is not valid JSON: {req}"))?;
    let res = call_once(&config.url, name, req, config.call_timeout()).await?;
    println!("{res}");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
