use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use carrel_blob::memory::MemoryBlobStore;
use carrel_server::api::{AppState, router};
use carrel_server::config::CarrelConfig;
use carrel_server::error::ServerError;
use carrel_state_memory::MemoryStateStore;

/// Carrel file-attachment storage server.
#[derive(Parser, Debug)]
#[command(name = "carrel-server", about = "Attachment storage contract server")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "carrel.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration from the TOML file, or use defaults if it does not
    // exist.
    let mut config: CarrelConfig = if Path::new(&cli.config).exists() {
        let contents = std::fs::read_to_string(&cli.config)?;
        toml::from_str(&contents).map_err(|e| ServerError::Config(e.to_string()))?
    } else {
        info!(path = %cli.config, "config file not found, using defaults");
        CarrelConfig::default()
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let state = AppState {
        state: Arc::new(MemoryStateStore::new()),
        blobs: Arc::new(MemoryBlobStore::new()),
        config: Arc::new(config.clone()),
    };

    let bind = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(
        addr = %bind,
        public_url = %config.server.public_url(),
        default_quota_bytes = config.quota.default_ceiling_bytes,
        "carrel server listening"
    );

    axum::serve(listener, router(state)).await?;
    Ok(())
}
