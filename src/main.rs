//! ci-droid command line
//!
//! Provisions, validates and tears down emulators described by a job file.

use std::path::PathBuf;
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ci_droid::commands::{describe_error, FingerprintCommand, ProvisionCommand, TeardownCommand, ValidateCommand};

/// Android emulator provisioning for automated builds
#[derive(Parser)]
#[command(name = "ci-droid")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the job's emulator and keep it until interrupted
    Provision {
        /// Path to the job file
        job: PathBuf,
    },

    /// Stop the job's emulator and the bridge server
    Teardown {
        /// Path to the job file
        job: PathBuf,
    },

    /// Check the job's emulator configuration
    Validate {
        /// Path to the job file
        job: PathBuf,
    },

    /// Print the scheduling fingerprint of the job's emulator
    Fingerprint {
        /// Path to the job file
        job: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("ci-droid v{}", ci_droid_core::VERSION);

    if let Err(e) = run(cli.command).await {
        error!("{}", describe_error(&e));
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Provision { job } => ProvisionCommand { job }.execute().await,
        Commands::Teardown { job } => TeardownCommand { job }.execute().await,
        Commands::Validate { job } => {
            if !(ValidateCommand { job }.execute().await?) {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Fingerprint { job } => FingerprintCommand { job }.execute().await,
    }
}
