//! FinStream - Entry Point

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// FinStream market data sync engine
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via FINSTREAM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must happen before any wss:// connection
    finstream_ws::init_crypto();

    let args = Args::parse();

    finstream_telemetry::init_logging()?;

    info!("Starting FinStream v{}", env!("CARGO_PKG_VERSION"));

    let config = finstream_app::AppConfig::load(args.config)?;
    info!(
        url = %config.connection.url,
        max_reconnect_attempts = config.connection.max_reconnect_attempts,
        stats_interval_secs = config.stats.interval_secs,
        "Configuration loaded"
    );

    let app = finstream_app::Application::new(config)?;
    app.run().await?;

    Ok(())
}
