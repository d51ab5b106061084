//! revert-proxy
//!
//! ```text
//!     Client ──▶ listener ──▶ http::server ──▶ proxy::ProxyCore ──▶ Transport ──▶ Backend
//!        ◀──────── streamed response ◀──── redirect / rewrite / flush policy ◀────┘
//!
//!     config file ──(--watch)──▶ watcher ──▶ new ProxyCore swapped in
//!     SIGINT/SIGTERM ──▶ Shutdown ──▶ graceful drain
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use revert_proxy::config::{load_config, watcher::ConfigWatcher, ProxyConfig};
use revert_proxy::http::HttpServer;
use revert_proxy::lifecycle::Shutdown;
use revert_proxy::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "revert-proxy")]
#[command(about = "Single-backend reverse proxy with redirect blocking and plain-text rewriting", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the relay when the configuration file changes.
    #[arg(short, long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "revert-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backend = %config.upstream.backend_authority,
        public_domain = %config.upstream.public_domain,
        forbidden_prefixes = config.upstream.forbidden_prefixes.len(),
        flush_interval_ms = config.upstream.flush_interval_ms,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    // Bind TCP listener
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(address = %local_addr, "Listening for connections");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Keep the watcher alive for the lifetime of the server.
    let (_watcher, config_updates) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        _ => (None, mpsc::unbounded_channel().1),
    };

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    shutdown.trigger_on_signal();

    let server = HttpServer::new(config)?;
    server.run(listener, config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
