//! Study server binary
//!
//! Run with: cargo run -p studyhub --bin studyhub-server -- --config studyhub.toml

use clap::Parser;
use std::path::PathBuf;
use studyhub::{config::StudyHubConfig, server::StudyHubServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "studyhub-server", version, about = "Research study backend")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "STUDYHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studyhub=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = StudyHubConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    tracing::info!("Configuration loaded");
    tracing::info!("  - Environment: {:?}", config.server.environment);
    tracing::info!("  - Database: {}", config.storage.database_path.display());
    tracing::info!("  - Documents: {}", config.storage.documents_dir.display());
    tracing::info!(
        "  - Analysis: {} {}",
        config.analysis.program,
        config.analysis.leading_args.join(" ")
    );
    tracing::info!(
        "  - Job retention: {}s (sweep every {}s)",
        config.jobs.retention_secs,
        config.jobs.sweep_interval_secs
    );
    if config.auth.verify_url.is_none() {
        tracing::warn!("No identity provider verify_url configured; only static tokens are accepted");
    }

    // Create and start server
    let server = StudyHubServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
