//! scanlink - Command-line front end for scanlink scanner backends
//!
//! Lists configured devices, shows their options and runs scans into
//! PBM/PGM/PPM files.

mod commands;
mod output;
mod pnm;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scanlink_backend::{BackendConfig, DeviceRegistry};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::ScanArgs;
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "scanlink")]
#[command(author, version, about = "Scanner backend command-line tool")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (defaults to one simulated flatbed)
    #[arg(short, long, env = "SCANLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Output format for listings
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured scanners
    List,

    /// Show the options of a scanner
    Options {
        /// Device name
        device: String,
    },

    /// Scan into a PNM file
    Scan {
        /// Device name
        device: String,

        #[command(flatten)]
        args: ScanArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("scanlink=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scanlink=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => BackendConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BackendConfig::simulated(),
    };

    let registry = DeviceRegistry::from_config(&config)
        .await
        .context("Failed to set up devices")?;
    let ctx = OutputContext::new(cli.output, cli.no_color, cli.quiet);

    let result = match &cli.command {
        Commands::List => commands::list(&registry, &ctx),
        Commands::Options { device } => commands::options(&registry, device, &ctx).await,
        Commands::Scan { device, args } => commands::scan(&registry, device, args, &ctx).await,
    };

    if let Err(e) = &result {
        ctx.error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
