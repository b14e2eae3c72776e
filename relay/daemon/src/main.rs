//! Relay Daemon - Reasoning-aware LLM Streaming Server
//!
//! Entry point for the thinking-relay daemon. Browser clients connect over
//! WebSocket (or plain HTTP) and receive the model's reasoning and answer as
//! separate stages.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (needs DASHSCOPE_API_KEY)
//! relay-daemon
//!
//! # Custom port and model
//! relay-daemon --port 9000 --model qwen-max
//!
//! # With config file
//! relay-daemon --config /etc/thinking-relay/relay.toml
//!
//! # Verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown
//! - `SIGHUP`: Reload sampling parameters from the config file

mod server;
mod wire;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{error, info, warn};

use relay_core::{
    default_config_path, load_config_from_path, ConfigOverrides, ConnectionHub, LlmBackend,
    OpenAiCompatBackend, SharedParams, StreamDriver,
};

use server::AppState;

/// Relay Daemon - Streams model reasoning and answers to browser clients
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen port (overrides HTTP_PORT and the config file)
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Listen address
    #[arg(short = 'b', long, value_name = "ADDR")]
    bind: Option<String>,

    /// Upstream model name
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_daemon={level},relay_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

struct Signals {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

fn install_signals() -> Result<Signals> {
    Ok(Signals {
        sigterm: signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?,
        sigint: signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?,
        sighup: signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?,
    })
}

/// Resolve once a shutdown signal arrives, reloading parameters on SIGHUP
async fn wait_for_shutdown(mut signals: Signals, config_path: Option<PathBuf>, params: SharedParams) {
    loop {
        tokio::select! {
            _ = signals.sigterm.recv() => {
                info!("Received SIGTERM, initiating shutdown");
                break;
            }
            _ = signals.sigint.recv() => {
                info!("Received SIGINT, initiating shutdown");
                break;
            }
            _ = signals.sighup.recv() => {
                info!("Received SIGHUP, reloading sampling parameters");
                let path = config_path.clone();
                let params = params.clone();
                if let Err(e) =
                    tokio::task::spawn_blocking(move || reload_params(path.as_deref(), &params)).await
                {
                    error!(error = %e, "Config reload task failed");
                }
            }
        }
    }
}

fn reload_params(path: Option<&Path>, params: &SharedParams) {
    let config = match load_config_from_path(path.map(Path::to_path_buf)) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Config reload failed, keeping current parameters");
            return;
        }
    };
    if config.config_file_path.is_none() {
        warn!(path = ?path, "No config file to reload, keeping current parameters");
        return;
    }
    if let Err(e) = params.replace(config.params) {
        warn!(error = %e, "Reloaded parameters rejected, keeping current parameters");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level)?;

    info!("Relay daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config =
        load_config_from_path(config_path.clone()).context("Failed to load configuration")?;

    ConfigOverrides {
        port: args.port,
        bind_address: args.bind,
        model: args.model,
    }
    .apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        source = ?config.source(),
        config_path = ?config.config_file_path,
        model = %config.upstream.model,
        base_url = %config.upstream.base_url,
        "Configuration loaded"
    );

    let backend =
        OpenAiCompatBackend::new(config.upstream.clone()).context("Failed to build HTTP client")?;
    if backend.health_check().await {
        info!(model = %backend.model(), "Upstream reachable");
    } else {
        warn!(base_url = %config.upstream.base_url, "Upstream health check failed, continuing");
    }

    let params = SharedParams::new(config.params);
    let driver = StreamDriver::new(Arc::new(backend), params.clone());
    let hub = ConnectionHub::new(config.outbound_queue_capacity);
    let state = AppState::new(hub, driver, &config);

    let address = config.listen_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;

    let signals = install_signals()?;
    let result = server::serve(listener, state, wait_for_shutdown(signals, config_path, params)).await;

    match result {
        Ok(()) => {
            info!("Relay daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
