use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pulse_core::config::StaticConfig;
use pulse_server::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "pulse", about = "State sync server for chat sessions", version)]
struct Cli {
    /// Port to listen on (0 picks a free port)
    #[arg(long, default_value_t = 4600)]
    port: u16,

    /// Model reported to clients when a session has no override
    #[arg(long)]
    default_model: Option<String>,

    /// Maximum number of concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Directory for session storage
    #[arg(long)]
    storage_path: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset, e.g. "pulse=debug"
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut static_config = StaticConfig::default();
    if let Some(model) = cli.default_model {
        static_config.default_model = model;
    }
    if let Some(max) = cli.max_sessions {
        static_config.max_sessions = max;
    }
    if let Some(path) = cli.storage_path {
        static_config.storage_path = path;
    }

    let server_config = ServerConfig {
        port: cli.port,
        ..Default::default()
    };

    let handle = pulse_server::start(server_config, static_config)
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "pulse ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");
    handle.shutdown();

    Ok(())
}
