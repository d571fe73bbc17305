use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quadsyncd::commands;
use quadsyncd::config::Config;
use quadsyncd::error::QuadsyncError;

#[derive(Parser)]
#[command(name = "quadsyncd", about = "GitOps reconciliation agent for rootless Podman Quadlet hosts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Minimum log level (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass, then exit.
    Sync {
        /// Path to the TOML config file.
        #[arg(long, default_value = "/etc/quadsyncd/config.toml")]
        config: PathBuf,
        /// Plan and log operations without touching the filesystem or the
        /// service manager.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run an initial pass, then serve the webhook endpoint until signalled.
    Serve {
        /// Path to the TOML config file.
        #[arg(long, default_value = "/etc/quadsyncd/config.toml")]
        config: PathBuf,
    },

    /// Print build metadata.
    Version,
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let result = match cli.command {
        Commands::Sync { config, dry_run } => load_config(&config).and_then(|cfg| commands::sync::run(&cfg, dry_run)),
        Commands::Serve { config } => load_config(&config).and_then(run_serve),
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::error!(event = "fatal", error = %e, "quadsyncd exited with an error");
        std::process::exit(1);
    }
}

fn load_config(path: &PathBuf) -> Result<Config, QuadsyncError> {
    Config::load(path)
}

fn run_serve(config: Config) -> Result<(), QuadsyncError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| QuadsyncError::Other(anyhow::anyhow!("building tokio runtime: {e}")))?;
    runtime.block_on(commands::serve::run(config))
}
