//! # Fission - Pipeline Runner
//!
//! The command line front end of fission-core.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                apps/fission (THE BINARY)              │
//! │                                                       │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐  │
//! │  │    CLI      │   │   Stages    │   │    Demo     │  │
//! │  │   (clap)    │   │ (TOML kinds)│   │  (lattice)  │  │
//! │  └──────┬──────┘   └──────┬──────┘   └──────┬──────┘  │
//! │         └─────────────────┼─────────────────┘         │
//! │                           ▼                           │
//! │                   ┌───────────────┐                   │
//! │                   │ fission-core  │                   │
//! │                   │ (THE PROTOCOL)│                   │
//! │                   └───────────────┘                   │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! fission check -c pipeline.toml
//! fission run -c pipeline.toml --cycles 100 --timeout-ms 500
//! fission demo --channels 8 --frames 1024 --periods 1000
//! ```

use clap::Parser;
use fission::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // FISSION_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("FISSION_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "fission=debug,fission_core=debug"
    } else {
        "fission=info,fission_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Fission startup banner.
fn print_banner() {
    println!(
        r#"
  ███████╗██╗███████╗███████╗██╗ ██████╗ ███╗   ██╗
  ██╔════╝██║██╔════╝██╔════╝██║██╔═══██╗████╗  ██║
  █████╗  ██║███████╗███████╗██║██║   ██║██╔██╗ ██║
  ██╔══╝  ██║╚════██║╚════██║██║██║   ██║██║╚██╗██║
  ██║     ██║███████║███████║██║╚██████╔╝██║ ╚████║
  ╚═╝     ╚═╝╚══════╝╚══════╝╚═╝ ╚═════╝ ╚═╝  ╚═══╝

  Thread-per-stage pipelines v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
