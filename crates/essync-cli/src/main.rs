mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::transfer::TransferArgs;
use crate::logging::LogFormat;

#[derive(Parser)]
#[command(
    name = "essync",
    version,
    about = "Copy indices between Elasticsearch-compatible clusters"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a transfer described by a pipeline YAML file
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Also print the report as a single JSON line
        #[arg(long)]
        json: bool,
    },
    /// Run a transfer from positional arguments
    Transfer(TransferArgs),
    /// Validate a pipeline and inspect source and destination indices
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Also print the result as a single JSON line
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level, cli.log_format);

    match cli.command {
        Commands::Run { pipeline, json } => commands::run::execute(&pipeline, json).await,
        Commands::Transfer(args) => commands::transfer::execute(&args).await,
        Commands::Check { pipeline, json } => commands::check::execute(&pipeline, json).await,
    }
}
