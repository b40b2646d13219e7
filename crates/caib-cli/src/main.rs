//! caib - client for the remote automotive image build API
//!
//! Submits builds, uploads the local files their manifests reference,
//! follows them to completion and downloads the resulting artifacts.

mod api;
mod artifact;
mod auth;
mod commands;
mod config;
mod monitor;
mod upload;

#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::build::BuildArgs;
use commands::download::DownloadArgs;
use commands::list::ListArgs;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "caib")]
#[command(author, version, about = "Build automotive OS images on a remote build service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a build, optionally waiting for it and downloading the result
    Build(BuildArgs),

    /// Download the artifact of a completed build
    Download(DownloadArgs),

    /// List builds
    List(ListArgs),

    /// Manage client settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current settings
    Show,

    /// Set the default build API URL
    SetServer {
        /// Base URL, e.g. https://builds.example.com
        url: String,
    },

    /// Allow a local directory's files to be referenced by absolute path
    AddSafeDir {
        /// Directory to allow
        dir: PathBuf,
    },

    /// Reset settings to defaults
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "caib_cli=debug,caib_core=debug"
    } else {
        "caib_cli=info,caib_core=info"
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    debug!("Starting caib {}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Build(args) => commands::build::run(args).await,
        Commands::Download(args) => commands::download::run(args).await,
        Commands::List(args) => commands::list::run(args).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show().await,
            ConfigAction::SetServer { url } => commands::config::set_server(&url).await,
            ConfigAction::AddSafeDir { dir } => commands::config::add_safe_dir(&dir).await,
            ConfigAction::Reset { yes } => commands::config::reset(yes).await,
        },
    };

    if let Err(ref e) = result {
        debug!("Command failed: {:?}", e);
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    result
}
