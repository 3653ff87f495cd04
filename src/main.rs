//! # Steward - controller entry point
//!
//! Parses the command line, installs the tracing subscriber, and hands off
//! to the command handlers.
//!
//! ## Shutdown
//!
//! `steward run` stops on SIGTERM/SIGINT through the `ShutdownCoordinator`:
//! the work queue stops handing out keys, in-flight reconciles get the
//! configured shutdown timeout, and stragglers are aborted.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use steward::cli::Cli;
use steward::commands::execute_command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    execute_command(cli.config, cli.command).await
}

/// Initialize tracing subscriber with environment filter.
///
/// `RUST_LOG` wins over `--log-level`; an unparsable level falls back to
/// `info`.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
