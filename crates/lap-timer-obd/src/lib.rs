//! Lap Timer OBD
//!
//! Connects to the car through an ELM327 adapter, discovers which sensors
//! answer and polls them round-robin for the lap timer.

pub mod cli;
pub mod config;
pub mod recorder;
pub mod session;

use anyhow::Context;
use cli::{Action, Args};
use config::Settings;
use recorder::SweepRecorder;
use session::{Connector, Output, SerialConnector, SimulatedConnector};
use std::fs::OpenOptions;
use std::io::Write;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Initialize logging
pub fn init_logging(level: Level) -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Run the action selected on the command line
pub async fn run(args: Args, settings: Settings) -> anyhow::Result<()> {
    let mut connector: Box<dyn Connector> = if args.mock {
        info!("Using simulated car");
        Box::new(SimulatedConnector)
    } else {
        Box::new(SerialConnector::new(settings.connection.clone()))
    };

    match args.action {
        Action::List => session::list(connector.as_mut(), &mut std::io::stdout()).await,
        Action::Poll(poll) => {
            let mut output = Output::new(std::io::stdout(), poll.json);
            if let Some(path) = &poll.csv {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                info!("Recording sweeps to {}", path.display());
                output = output.with_recorder(SweepRecorder::new(Box::new(file) as Box<dyn Write + Send>));
            }

            tokio::select! {
                result = session::poll(connector.as_mut(), &settings.poll, poll.count, &mut output) => {
                    let delivered = result?;
                    info!("Done after {} readings", delivered);
                }
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
            Ok(())
        }
        Action::LowPower => {
            if args.mock {
                anyhow::bail!("low-power needs a serial adapter");
            }
            session::low_power(settings.connection).await
        }
    }
}
