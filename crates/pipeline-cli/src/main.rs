//! pipectl - inspect and drain the telemetry pipeline's event store.

mod commands;
mod settings;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pipeline_config_and_utils::{init_logging, Config, Paths};

/// Telemetry pipeline command-line interface.
#[derive(Parser)]
#[command(name = "pipectl")]
#[command(about = "Inspect and drain the telemetry pipeline's event store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, store and logs. Defaults to ~/.telemetry-pipeline
    #[arg(long, global = true, env = "PIPELINE_BASE_DIR")]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show stored record counts per channel
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Delete every stored record of a channel
    Clear {
        /// Channel name
        channel: String,
    },
    /// Store one event for a channel
    Enqueue {
        /// Channel name
        channel: String,
        /// Event type tag
        #[arg(short = 't', long = "type", default_value = "event")]
        type_tag: String,
        /// Event body, stored as given
        body: String,
    },
    /// Send everything stored to the ingestion endpoint, then exit
    Drain {
        /// Give up after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;

    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_logging(&config.log_level, &paths.log_file(), false)?;

    match cli.command {
        Commands::Status { json } => commands::status(&paths, json)?,
        Commands::Clear { channel } => commands::clear(&paths, &channel)?,
        Commands::Enqueue {
            channel,
            type_tag,
            body,
        } => commands::enqueue(&paths, &config, &channel, &type_tag, body)?,
        Commands::Drain { timeout_secs } => {
            commands::drain(&paths, &config, std::time::Duration::from_secs(timeout_secs)).await?
        }
    }

    Ok(())
}
