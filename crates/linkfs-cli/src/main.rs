//! linkfs — symlink self-test harness
//!
//! This binary builds an in-memory linkfs namespace from a JSON
//! configuration and replays the symlink scenarios against it: link
//! creation, dangling targets, cycles, chains and a multi-threaded
//! create/unlink race on a single name.

mod scenario;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use linkfs_core::{FsConfig, FsCore, FsStats};
use tracing::{error, info};

use scenario::RaceOptions;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable verbose logging (same as --log-level debug)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the symlink scenarios against a fresh filesystem
    Selftest {
        /// Run a single scenario instead of both
        #[arg(long, value_enum)]
        only: Option<Scenario>,

        /// Threads racing on the same link name
        #[arg(long, default_value = "2")]
        children: usize,

        /// Operations per racing thread
        #[arg(long, default_value = "100")]
        iterations: usize,

        /// Seed of each thread's pseudo-random operation sequence
        #[arg(long, default_value = "97")]
        seed: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Scenario {
    Symlinks,
    Concurrent,
}

fn load_config(config_path: Option<PathBuf>) -> Result<FsConfig> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(&path)?;
            let config: FsConfig = serde_json::from_str(&content)?;
            Ok(config)
        }
        None => {
            // Default configuration
            Ok(FsConfig::default())
        }
    }
}

fn run_selftest(config: FsConfig, only: Option<Scenario>, race: &RaceOptions) -> Result<FsStats> {
    let fs = Arc::new(FsCore::new(config)?);
    scenario::cleanup(&fs)?;

    let mut failed = false;
    if only.map_or(true, |s| s == Scenario::Symlinks) {
        if let Err(e) = scenario::run_symlinks(&fs) {
            error!("FAILURE: {:#}", e);
            failed = true;
        }
    }
    if only.map_or(true, |s| s == Scenario::Concurrent) {
        if let Err(e) = scenario::run_concurrent(Arc::clone(&fs), race) {
            error!("FAILED: {:#}", e);
            failed = true;
        }
    }

    scenario::cleanup(&fs)?;
    if failed {
        bail!("symlink self-test failed");
    }
    Ok(fs.stats())
}

fn log_level(args: &Args) -> tracing::Level {
    let level = if args.verbose { "debug" } else { args.log_level.as_str() };
    match level {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = log_level(&args);
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = load_config(args.config)?;
    info!("Configuration loaded: {:?}", config);

    match args.command {
        Commands::Selftest {
            only,
            children,
            iterations,
            seed,
        } => {
            let race = RaceOptions {
                children,
                iterations,
                seed,
            };
            let stats = run_selftest(config, only, &race)?;
            println!("{}", serde_json::to_string(&stats)?);
        }
    }

    Ok(())
}
