//! asset-tiers - command-line front end for the asset delivery engine.
//!
//! Every subcommand prints a summary (or JSON with `--json`) and exits 0 on
//! full success, 1 on any failure or invalid configuration.

mod handlers;

use anyhow::{Context, Result};
use asset_tiers::DeliveryConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Local root used when neither a config file nor `--local-root` names one.
const DEFAULT_LOCAL_ROOT: &str = "public/imgs";

#[derive(Parser, Debug)]
#[command(name = "asset-tiers")]
#[command(about = "Tiered media asset delivery and migration")]
struct Args {
    /// JSON configuration file (defaults to <config dir>/asset-tiers/config.json
    /// when present, else R2_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the local asset root
    #[arg(long, global = true)]
    local_root: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Validate the configuration
    Validate,
    /// Check every enabled tier
    Health,
    /// Fetch an asset through the tier chain
    Get {
        /// Object key, e.g. imgs/hero.webp
        key: String,
        /// Write the payload to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Store a file under imgs/<filename>
    Put {
        path: PathBuf,
    },
    /// Report which tiers hold a key
    Exists {
        key: String,
    },
    /// Migrate the local inventory to the remote tier
    Migrate {
        /// Print the phase plan without uploading anything
        #[arg(long)]
        plan_only: bool,
    },
    /// Check migrated assets against the remote listing
    Verify,
    /// Reset migrated assets to local (remote objects are kept)
    Rollback,
    /// Run the health monitor until Ctrl-C
    Monitor,
}

fn init_logging(args: &Args) {
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries command output; logs go to stderr.
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);
    if args.json_logs {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("asset-tiers").join("config.json"))
        .filter(|path| path.is_file())
}

fn load_config(args: &Args) -> Result<DeliveryConfig> {
    let mut config = match args.config.clone().or_else(default_config_path) {
        Some(path) => {
            debug!("Loading configuration from {}", path.display());
            DeliveryConfig::from_json_file(&path)
                .with_context(|| format!("loading {}", path.display()))?
        }
        None => DeliveryConfig::from_env(DEFAULT_LOCAL_ROOT),
    };
    if let Some(root) = &args.local_root {
        config.local_root = root.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    let outcome = match load_config(&args) {
        Ok(config) => handlers::run(args.command, config, args.json).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
