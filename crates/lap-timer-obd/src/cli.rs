//! Command line arguments

use crate::config::Settings;
use clap::{Parser, Subcommand};
use obd_protocol::ObdProtocol;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lap-timer-obd", version)]
#[command(about = "Discover and poll OBD-II sensors for a lap timer")]
pub struct Args {
    /// Settings file (defaults to ./lap-timer-obd.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Serial port of the ELM327 adapter (e.g., /dev/ttyUSB0 or COM3)
    #[arg(short, long, global = true)]
    pub device: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true)]
    pub baud: Option<u32>,

    /// OBD protocol, ELM327 number (0-9, A-C) or name
    #[arg(short, long, global = true)]
    pub protocol: Option<ObdProtocol>,

    /// Log adapter traffic
    #[arg(long, global = true)]
    pub debug: bool,

    /// Use a simulated car instead of a serial adapter
    #[arg(long, global = true)]
    pub mock: bool,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Action {
    /// Print every supported command with its current value
    List,
    /// Poll the responding commands round-robin
    Poll(PollArgs),
    /// Put the adapter into low power mode
    LowPower,
}

#[derive(clap::Args, Debug, Default, PartialEq, Eq)]
pub struct PollArgs {
    /// Stop after this many readings
    #[arg(short = 'n', long)]
    pub count: Option<u64>,

    /// Append one row per sweep to this CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Print readings as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Delay between polls in milliseconds
    #[arg(short, long)]
    pub interval_ms: Option<u64>,
}

impl Args {
    /// Apply command line overrides on top of loaded settings
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(device) = &self.device {
            settings.connection.device = device.clone();
        }
        if let Some(baud) = self.baud {
            settings.connection.baud_rate = baud;
        }
        if let Some(protocol) = self.protocol {
            settings.connection.protocol = protocol;
        }
        if self.debug {
            settings.log_level = "debug".to_string();
        }
        if let Action::Poll(poll) = &self.action {
            if let Some(interval_ms) = poll.interval_ms {
                settings.poll.interval_ms = interval_ms;
            }
        }
    }
}
