//! Tethercap CLI — list tethered capture devices and record their screens.
//!
//! Usage:
//!   tethercap devices [--watch]     List attached devices, optionally
//!                                   streaming attach/detach events
//!   tethercap record [OPTIONS]      Record a device's screen to disk
//!   tethercap check                 Check platform capabilities
//!   tethercap config [--write]      Show or persist the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "tethercap",
    about = "Screen recording for tethered capture devices",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached eligible devices
    Devices {
        /// Keep running and print attach/detach events
        #[arg(long)]
        watch: bool,

        /// Print the device list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a device's screen until Ctrl+C
    Record {
        /// Device id to record (optional when exactly one is attached)
        #[arg(short, long)]
        device: Option<String>,

        /// Output directory (defaults to the configured recordings dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also attach the JPEG still-image sink
        #[arg(long)]
        still_image: bool,
    },

    /// Check platform capabilities
    Check,

    /// Show the resolved configuration
    Config {
        /// Write the resolved configuration to the config file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging follows the config file; --verbose overrides the level.
    let mut logging = tethercap_common::config::AppConfig::load().logging;
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    tethercap_common::logging::init_logging(&logging)?;

    match cli.command {
        Commands::Devices { watch, json } => commands::devices::run(watch, json).await,
        Commands::Record {
            device,
            output,
            still_image,
        } => commands::record::run(device, output, still_image).await,
        Commands::Check => commands::check::run(),
        Commands::Config { write } => commands::config::run(write),
    }
}
