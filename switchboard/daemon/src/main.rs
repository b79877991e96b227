//! Switchboard Daemon - Quota-Aware Completion Gateway
//!
//! Serves an OpenAI-compatible `/v1/chat/completions` endpoint that fails
//! over between Gemini, HuggingFace, OpenRouter and a local Ollama instance.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:3000, ~/.config/switchboard/switchboard.toml)
//! switchboard-daemon
//!
//! # Custom bind address
//! switchboard-daemon --host 127.0.0.1 --port 8080
//!
//! # With config file
//! switchboard-daemon --config /etc/switchboard/switchboard.toml
//!
//! # Verbose logging
//! RUST_LOG=debug switchboard-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use switchboard_core::{default_config_path, load_config_from_path, ConfigOverrides};

use server::DaemonServer;

/// Switchboard Daemon - Quota-aware failover gateway for chat completions
#[derive(Parser, Debug)]
#[command(name = "switchboard-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "SWITCHBOARD_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Interface to listen on (hostname or IP)
    #[arg(long, env = "SWITCHBOARD_HOST", value_name = "HOST")]
    host: Option<String>,

    /// Port to listen on (overrides PORT and the config file)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "SWITCHBOARD_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(host) = &self.host {
            overrides = overrides.with_host(host.clone());
        }
        if let Some(port) = self.port {
            overrides = overrides.with_port(port);
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "switchboard_daemon={level},switchboard_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .init();
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, initiating shutdown"),
        () = terminate => info!("Received SIGTERM, initiating shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Switchboard Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().or_else(default_config_path);
    if let Some(ref path) = config_path {
        info!(config_path = ?path, "Config file");
    }

    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);

    info!(
        source = %config.source(),
        host = %config.server.host,
        port = config.server.port,
        "Configuration resolved"
    );

    let server = DaemonServer::new(&config)?;

    match server.run(shutdown_signal()).await {
        Ok(()) => {
            info!("Switchboard daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
