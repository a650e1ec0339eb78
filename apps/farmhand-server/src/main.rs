use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use farmhand_server::run_server;

/// Print-job orchestrator for a 3D-printer farm.
#[derive(Debug, Parser)]
#[command(name = "farmhand-server", version)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address override, e.g. 0.0.0.0:8080.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = farmhand_config::load_config(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen = listen.to_string();
    }
    run_server(config).await
}
