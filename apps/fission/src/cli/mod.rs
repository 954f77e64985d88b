//! # Fission CLI Module
//!
//! This module implements the CLI interface for Fission.
//!
//! ## Available Commands
//!
//! - `run` - Build a pipeline from TOML and drive it for N cycles
//! - `check` - Validate a pipeline file without starting threads
//! - `demo` - Run the two-lattice copy demo

mod commands;

use clap::{Parser, Subcommand};
use fission_core::FissionError;
use std::path::PathBuf;
use std::time::Duration;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Fission - thread-per-stage pipelines
///
/// Every stage runs on its own thread and waits on its predecessor's
/// broadcast signal. A trigger starts each cycle and a fusion ends it.
#[derive(Parser, Debug)]
#[command(name = "fission")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline described in a TOML file
    Run {
        /// Path to the pipeline file
        #[arg(short, long)]
        config: PathBuf,

        /// Number of trigger cycles
        #[arg(short = 'n', long, default_value = "10")]
        cycles: u64,

        /// Longest wait for one fusion round, in milliseconds
        #[arg(short, long, default_value = "1000")]
        timeout_ms: u64,
    },

    /// Validate a pipeline file
    Check {
        /// Path to the pipeline file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run the two-lattice copy demo
    Demo {
        /// Number of channels (one stage pair each)
        #[arg(short, long, default_value = "2")]
        channels: usize,

        /// Frames per period
        #[arg(short, long, default_value = "256")]
        frames: usize,

        /// Number of periods
        #[arg(short, long, default_value = "100")]
        periods: u64,

        /// Longest wait for one period, in milliseconds
        #[arg(short, long, default_value = "1000")]
        timeout_ms: u64,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), FissionError> {
    let json_mode = cli.json_mode;
    let verbose = cli.verbose;

    match cli.command {
        Commands::Run {
            config,
            cycles,
            timeout_ms,
        } => cmd_run(
            &config,
            cycles,
            Duration::from_millis(timeout_ms),
            json_mode,
            verbose,
        ),
        Commands::Check { config } => cmd_check(&config, json_mode),
        Commands::Demo {
            channels,
            frames,
            periods,
            timeout_ms,
        } => cmd_demo(
            &crate::demo::DemoOptions {
                channels,
                frames,
                periods,
                timeout: Duration::from_millis(timeout_ms),
            },
            json_mode,
            verbose,
        ),
    }
}
