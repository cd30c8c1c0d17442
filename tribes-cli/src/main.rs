//! tribes CLI - operator tooling for the tribes database layer
//!
//! - `check`: run one verified no-op transaction and report the session
//!   settings it ran with (isolation, timeouts, search_path)
//! - `monitor`: run the deadlock monitor until Ctrl+C / SIGTERM

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

mod commands;
mod config;
mod tracing_setup;

#[derive(Parser, Debug)]
#[command(
    name = "tribes",
    author,
    version,
    about = "Operator tooling for the tribes database layer",
    long_about = "Check transaction configuration against a live database and watch it for \
                  sessions stuck behind the deadlock detector."
)]
struct Cli {
    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(long, global = true)]
    debug: bool,

    /// Config file (default: ~/.tribes/config.toml)
    #[arg(long, global = true, env = "TRIBES_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a verified no-op transaction and print its session settings
    Check(commands::check::CheckArgs),
    /// Watch for sessions blocked past deadlock_timeout
    Monitor(commands::monitor::MonitorArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing, so .env can supply TRIBES_CONFIG to clap.
    let dotenv_files = config::load_dotenv();
    let cli = Cli::parse();

    tracing_setup::init(cli.debug)?;
    for path in &dotenv_files {
        debug!("Loaded .env from {}", path.display());
    }

    let store_config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Check(args) => commands::run_check(&store_config, args).await,
        Commands::Monitor(args) => commands::run_monitor(&store_config, args).await,
    }
}
