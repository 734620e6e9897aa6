//! chartwarden - reconciles ChartRelease descriptors into installed chart releases

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use chartwarden::cli::{self, ConfigSubcommand};
use chartwarden::config::ConfigLoader;

/// Declarative chart release reconciliation across Kubernetes clusters
#[derive(Parser, Debug)]
#[command(name = "chartwarden")]
#[command(about = "Reconciles ChartRelease resources into installed chart releases", long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Main commands
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ChartRelease controller (default)
    Run {
        /// Kubeconfig context of the management cluster
        #[arg(long)]
        context: Option<String>,
    },
    /// Print the ChartRelease CustomResourceDefinition
    Crd,
    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Run { context: None }) {
        Command::Crd => cli::print_crd(),
        Command::Config { subcommand } => {
            cli::handle_config_command(subcommand, args.config.as_deref())
        }
        Command::Version => {
            cli::display_version();
            Ok(())
        }
        Command::Run { context } => {
            cli::init_logging(args.debug, args.log_file.as_deref())?;

            let config = ConfigLoader::load(args.config.as_deref())
                .context("Failed to load configuration")?;
            ConfigLoader::check(&config)?;
            info!(version = env!("CARGO_PKG_VERSION"), "Starting chartwarden");

            let client = chartwarden::kube::create_client(context.as_deref())
                .await
                .context("Failed to create Kubernetes client")?;

            chartwarden::controller::run(client, &config).await
        }
    }
}
