//! Lap Timer OBD - Main Entry Point

use anyhow::Context;
use clap::Parser;
use lap_timer_obd::cli::Args;
use lap_timer_obd::config::Settings;
use lap_timer_obd::{init_logging, run};
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    args.apply(&mut settings);
    init_logging(settings.log_level()?)?;

    info!("=== Lap Timer OBD v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Adapter {} at {} baud, protocol {}",
        settings.connection.device, settings.connection.baud_rate, settings.connection.protocol
    );

    run(args, settings).await
}
