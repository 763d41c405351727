//! DSLink client: entry point.
//!
//! Connects to a broker's WebSocket endpoint, logs every envelope and
//! connectivity event, and reconnects when the connection is lost.  Useful
//! for checking that a broker is reachable and speaks the expected wire
//! format.
//!
//! # Usage
//!
//! ```text
//! dslink-client [OPTIONS]
//!
//! Options:
//!   --broker-url <URL>          ws:// or wss:// endpoint [default: ws://127.0.0.1:8080/ws]
//!   --config <PATH>             TOML config file
//!   --format <json|msgpack>     Override the format negotiated from the URL
//!   --reconnect-interval <SECS> Pause between attempts [default: 5]
//!   --log-level <LEVEL>         Level used when RUST_LOG is unset [default: info]
//!   --once                      Exit after the first session instead of reconnecting
//! ```
//!
//! Flags override values from `--config`, which override built-in defaults.
//!
//! | Variable             | Flag                  |
//! |----------------------|-----------------------|
//! | `DSLINK_BROKER_URL`  | `--broker-url`        |
//! | `DSLINK_CONFIG`      | `--config`            |
//! | `DSLINK_FORMAT`      | `--format`            |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dslink_client::application::{Dispatcher, Link};
use dslink_client::domain::LinkConfig;
use dslink_client::infrastructure::{ConnectTarget, Workers, WsTransport};
use dslink_core::WireFormat;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// DSLink client command line.
#[derive(Debug, Parser)]
#[command(
    name = "dslink-client",
    about = "Connects to a DSLink broker and logs the envelopes it exchanges",
    version
)]
struct Cli {
    /// Broker WebSocket URL.  `?format=msgpack` selects binary frames.
    #[arg(long, env = "DSLINK_BROKER_URL")]
    broker_url: Option<String>,

    /// TOML configuration file.
    #[arg(long, env = "DSLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Wire format override (`json` or `msgpack`).
    #[arg(long, env = "DSLINK_FORMAT")]
    format: Option<String>,

    /// Seconds to wait before reconnecting.
    #[arg(long)]
    reconnect_interval: Option<u64>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long)]
    log_level: Option<String>,

    /// Exit after the first session ends.
    #[arg(long)]
    once: bool,
}

impl Cli {
    /// Loads `--config` (if any) and applies flag overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed.
    fn into_link_config(self) -> anyhow::Result<LinkConfig> {
        let mut config = match &self.config {
            Some(path) => LinkConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => LinkConfig::default(),
        };

        if let Some(url) = self.broker_url {
            config.broker_url = url;
        }
        if let Some(format) = self.format {
            config.format = Some(format);
        }
        if let Some(secs) = self.reconnect_interval {
            config.reconnect_interval_secs = secs;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        Ok(config)
    }
}

/// Resolves the broker URL and applies any format override.
fn resolve_target(config: &LinkConfig) -> anyhow::Result<ConnectTarget> {
    let target = ConnectTarget::parse(&config.broker_url)
        .with_context(|| format!("invalid broker URL '{}'", config.broker_url))?;

    match config.format.as_deref() {
        Some(name) => {
            let format = WireFormat::from_name(name)
                .with_context(|| format!("unknown wire format '{name}' (expected json or msgpack)"))?;
            Ok(target.with_format(format))
        }
        None => Ok(target),
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

enum SessionEnd {
    /// The connection went away on its own.
    Lost,
    /// The user pressed Ctrl+C.
    Interrupted,
}

/// One connection attempt with a fresh dispatcher, link, and transport.
async fn run_session(config: &LinkConfig, target: &ConnectTarget) -> anyhow::Result<SessionEnd> {
    let dispatcher = Arc::new(Dispatcher::new(
        target.format,
        Workers::tokio(&Handle::current()),
    ));
    dispatcher.set_request_handler(|batch| {
        info!(msg = ?batch.msg_id, count = batch.data.len(), "requests received");
    });
    dispatcher.set_response_handler(|batch| {
        info!(msg = ?batch.msg_id, count = batch.data.len(), "responses received");
    });
    dispatcher.set_error_handler(|e| warn!("dispatch error: {e}"));
    dispatcher.set_close_handler(|| info!("session closed"));

    let link = Arc::new(Link::new(dispatcher));
    let transport = WsTransport::new(Handle::current(), config.transport_config());
    transport
        .connect_async(target, link.clone())
        .await
        .with_context(|| format!("failed to connect to {target}"))?;

    tokio::select! {
        _ = link.wait_disconnected() => {
            if let Some(fault) = link.last_fault() {
                warn!("connection lost: {fault}");
            }
            Ok(SessionEnd::Lost)
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C; closing link");
            if let Err(e) = link.shutdown() {
                warn!("shutdown: {e}");
            }
            // Give the close handshake a moment to finish.
            let _ = tokio::time::timeout(Duration::from_secs(2), link.wait_disconnected()).await;
            Ok(SessionEnd::Interrupted)
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let once = cli.once;
    let config = cli.into_link_config()?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let target = resolve_target(&config)?;
    info!("dslink-client starting: broker={target}");

    loop {
        match run_session(&config, &target).await {
            Ok(SessionEnd::Interrupted) => break,
            Ok(SessionEnd::Lost) => info!("session ended"),
            Err(e) => warn!("{e:#}"),
        }
        if once {
            break;
        }

        info!(
            "reconnecting in {}s",
            config.reconnect_interval().as_secs()
        );
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_interval()) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C");
                break;
            }
        }
    }

    info!("dslink-client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
