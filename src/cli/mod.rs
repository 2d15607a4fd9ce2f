//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod commands;
mod progress;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use dsexport::config::{Config, Settings};

#[derive(Parser)]
#[command(name = "dsexport")]
#[command(about = "Export crawl/scrape datasets into a SQL table")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Export job file (JSON, TOML or YAML). Defaults to the INPUT record of
    /// the local key-value store.
    #[arg(short, long, global = true, env = "DSEXPORT_INPUT")]
    input: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if debug mode is enabled (for early logging setup).
pub fn is_debug() -> bool {
    std::env::args().any(|arg| arg == "-d" || arg == "--debug")
}

#[derive(Subcommand)]
enum Commands {
    /// Load the datasets (or inline rows) and insert them into the table
    Export {
        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Resolve item counts and print the window plan without fetching items
    Plan,

    /// Manage the persisted loading state
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// Show which windows are done
    Show,
    /// Forget every finished window so the next export starts over
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.debug {
        tracing::debug!("Debug logging enabled");
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .await
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::load().await,
    };
    let settings = Settings::resolve(&config);

    match cli.command {
        Commands::Export { no_progress } => {
            commands::export::cmd_export(&settings, cli.input.as_deref(), !no_progress).await
        }
        Commands::Plan => commands::plan::cmd_plan(&settings, cli.input.as_deref()).await,
        Commands::State { command } => match command {
            StateCommands::Show => commands::state::cmd_state_show(&settings).await,
            StateCommands::Reset { yes } => commands::state::cmd_state_reset(&settings, yes).await,
        },
    }
}
