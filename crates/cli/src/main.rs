use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sideload_bolos::TargetId;

mod commands;
mod utils;

use commands::*;
use utils::{AppArgs, DeviceArgs};

#[derive(Parser)]
#[command(version, about = "Sideload applications onto BOLOS devices")]
struct Cli {
    /// Trace level output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the areas and entry point of an Intel HEX file
    Inspect {
        /// Intel HEX file
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Compute the application hash without a device
    Hash {
        #[command(flatten)]
        app: AppArgs,

        /// Device model name or hex target id
        #[arg(long, env = "SIDELOAD_TARGET_ID", default_value = "nanosp")]
        target_id: TargetId,
    },

    /// Explain a status word
    Status {
        /// Status word in hex, e.g. 6985
        #[arg(required = true)]
        sw: String,
    },

    /// Install an application
    Load {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        app: AppArgs,

        /// Delete an application of the same name first
        #[arg(long)]
        delete: bool,
    },

    /// Delete an application
    Delete {
        #[command(flatten)]
        device: DeviceArgs,

        /// Application name
        #[arg(required_unless_present = "hash")]
        name: Option<String>,

        /// Full application hash in hex
        #[arg(long, conflicts_with = "name")]
        hash: Option<String>,
    },

    /// List installed applications
    List {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Show memory usage
    Meminfo {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Show the dashboard version
    Version {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Install a custom certificate authority
    SetupCa {
        #[command(flatten)]
        device: DeviceArgs,

        /// Name of the authority
        #[arg(long, required = true)]
        name: String,

        /// Uncompressed public key in hex
        #[arg(long, required = true)]
        public_key: String,
    },

    /// Remove the custom certificate authority
    ResetCa {
        #[command(flatten)]
        device: DeviceArgs,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match &cli.command {
        Commands::Inspect { file } => inspect_command(file)?,
        Commands::Hash { app, target_id } => hash_command(app, *target_id)?,
        Commands::Status { sw } => status_command(sw)?,
        Commands::Load {
            device,
            app,
            delete,
        } => load_command(device, app, *delete)?,
        Commands::Delete { device, name, hash } => {
            delete_command(device, name.as_deref(), hash.as_deref())?
        }
        Commands::List { device } => list_command(device)?,
        Commands::Meminfo { device } => meminfo_command(device)?,
        Commands::Version { device } => version_command(device)?,
        Commands::SetupCa {
            device,
            name,
            public_key,
        } => setup_ca_command(device, name, public_key)?,
        Commands::ResetCa { device } => reset_ca_command(device)?,
    }

    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(true)
        .init();
}
