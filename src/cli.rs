use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::consts::DEFAULT_CONFIG;
use crate::executor::manager::ParallelManager;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: SubArgs,

    #[arg(
        short = 'm',
        long = "manager",
        help = "Parallel executor strategy used to launch tasks",
        value_name = "MANAGER",
        required = false,
        global = true,
        default_value = "local"
    )]
    pub manager: ParallelManager,

    #[arg(
        short = 'v',
        long = "verbose",
        help = "Increase verbosity",
        global = true,
        conflicts_with = "quiet"
    )]
    pub verbose: bool,

    #[arg(short = 'q', long = "quiet", help = "Decrease verbosity", global = true)]
    pub quiet: bool,
}

impl Args {
    pub fn level(&self) -> log::Level {
        if self.verbose {
            log::Level::Debug
        } else if self.quiet {
            log::Level::Warn
        } else {
            log::Level::Info
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum SubArgs {
    #[command(name = "create")]
    Create {
        #[command(flatten)]
        args: CreateArgs,
    },
    #[command(name = "run")]
    Run {
        #[command(flatten)]
        args: ConfigArgs,
    },
    #[command(name = "status")]
    Status {
        #[command(flatten)]
        args: ConfigArgs,
    },
}

impl SubArgs {
    pub fn config(&self) -> &PathBuf {
        match self {
            SubArgs::Create { args } => &args.config,
            SubArgs::Run { args } | SubArgs::Status { args } => &args.config,
        }
    }
}

/// Group BAM files into size-bounded batches and create one draft task per batch
///
/// # Example
///
/// ```bash,no_run
/// cgctask create -c config.toml
/// cgctask create -c config.toml --lower 300 --upper 500 --dry-run
/// ```
///
/// # Arguments
///
/// * `config` - Path to the configuration file
/// * `lower` - Lower bound on total size (GB) of a batch, overrides config
/// * `upper` - Upper bound on total size (GB) of a batch, overrides config
/// * `dry_run` - Only log the batches, do not store draft tasks
///
/// # Note
///
/// * Bounds are exclusive: a batch closes when lower < total < upper
#[derive(Debug, Parser, Clone)]
pub struct CreateArgs {
    #[arg(
        short = 'c',
        long = "config",
        help = "Path to the configuration file",
        value_name = "CONFIG",
        default_value = DEFAULT_CONFIG
    )]
    pub config: PathBuf,

    #[arg(
        short = 'l',
        long = "lower",
        help = "Lower bound on total size (GB) of input files passed to a task",
        value_name = "GB"
    )]
    pub lower: Option<f64>,

    #[arg(
        short = 'u',
        long = "upper",
        help = "Upper bound on total size (GB) of input files passed to a task",
        value_name = "GB"
    )]
    pub upper: Option<f64>,

    #[arg(short = 'd', long = "dry-run", help = "Log batches without creating tasks")]
    pub dry_run: bool,
}

/// Run draft tasks or show task status
///
/// # Example
///
/// ```bash,no_run
/// cgctask run -c config.toml -m para
/// cgctask status -c config.toml
/// ```
#[derive(Debug, Parser, Clone)]
pub struct ConfigArgs {
    #[arg(
        short = 'c',
        long = "config",
        help = "Path to the configuration file",
        value_name = "CONFIG",
        default_value = DEFAULT_CONFIG
    )]
    pub config: PathBuf,
}
