//! # wsgate
//!
//! Gateway binary: loads settings, registers the built-in methods and serves
//! WebSocket clients until Ctrl-C.

#![deny(unsafe_code)]

mod methods;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use wsgate_server::{Gateway, ServerConfig};
use wsgate_settings::GatewaySettings;

/// WebSocket RPC and pub/sub gateway.
#[derive(Parser, Debug)]
#[command(name = "wsgate", about = "WebSocket RPC and pub/sub gateway")]
struct Cli {
    /// Host to bind (overrides settings if specified).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings if specified).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings file (default `~/.wsgate/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Concurrent requests per connection (overrides settings if specified).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_concurrency: Option<u32>,
}

impl Cli {
    /// Server configuration from `settings` with command-line overrides applied.
    fn server_config(&self, settings: &GatewaySettings) -> ServerConfig {
        let mut config = ServerConfig::from(settings);
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(n) = self.max_concurrency {
            config.max_concurrency = n as usize;
        }
        config
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // No-op if a subscriber is already set
    let _ = subscriber.try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(wsgate_settings::settings_path);
    let settings = wsgate_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    init_subscriber(&settings.logging.level);

    let config = args.server_config(&settings);
    let metrics = wsgate_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let gateway = methods::register_all(Gateway::builder(config))
        .metrics(metrics)
        .build()
        .context("Failed to build gateway")?;

    let (addr, handle) = gateway
        .listen()
        .await
        .context("Failed to bind server")?;
    tracing::info!(
        method_count = gateway.methods().len(),
        "wsgate listening on ws://{addr}/ws"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    gateway
        .shutdown()
        .graceful_shutdown(vec![handle], None)
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}
