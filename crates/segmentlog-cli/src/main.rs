//! segmentlog offline tool.
//!
//! Inspects and repairs a topic directory without running an appender.
//!
//! # Quick Start
//!
//! ```bash
//! # Print every batch header of every segment
//! segmentlog dump ./logs/orders
//!
//! # Check every batch checksum; exits non-zero on damage
//! segmentlog verify ./logs/orders
//!
//! # Truncate a torn tail and print the recovered high-water mark
//! segmentlog recover ./logs/orders
//! ```

mod commands;
mod style;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use segmentlog_config::{CommitLogConfig, ConfigLoader};

/// segmentlog - inspect and repair segmented commit logs.
#[derive(Parser)]
#[command(name = "segmentlog")]
#[command(author, version, long_about = None)]
#[command(about = "segmentlog - inspect and repair segmented commit logs")]
#[command(propagate_version = true)]
struct Cli {
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    /// Config file to take buffer sizes and codec settings from.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Print the batches of every segment in a topic directory.
    Dump {
        /// Topic directory holding `{base}.log` files.
        dir: PathBuf,

        /// Also print every record.
        #[arg(short, long)]
        records: bool,

        /// Only dump the segment with this base offset.
        #[arg(short, long)]
        segment: Option<u64>,
    },

    /// Verify every batch checksum without modifying anything.
    Verify {
        /// Topic directory holding `{base}.log` files.
        dir: PathBuf,
    },

    /// Truncate an invalid tail from the active segment.
    Recover {
        /// Topic directory holding `{base}.log` files.
        dir: PathBuf,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<CommitLogConfig> {
    match path {
        Some(path) => ConfigLoader::new().with_config_file(path).load(),
        None => Ok(ConfigLoader::new().load_or_default()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    style::set_no_color(cli.no_color);

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Dump {
            dir,
            records,
            segment,
        } => commands::dump::run(&dir, &load_config(cli.config)?, records, segment),
        Commands::Verify { dir } => commands::verify::run(&dir, &load_config(cli.config)?),
        Commands::Recover { dir } => commands::recover::run(&dir, &load_config(cli.config)?),
    }
}
