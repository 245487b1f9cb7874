#![forbid(unsafe_code)]

//! `strata`: validate, plan, and run workflow graphs from the command line.

mod cli;
mod commands;
mod config;
mod plugins;

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::Cli;

// Tracing target constants
pub const TRACING_TARGET_RUN: &str = "strata_cli::run";
pub const TRACING_TARGET_SHUTDOWN: &str = "strata_cli::shutdown";

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(error) => {
            if tracing::enabled!(tracing::Level::ERROR) {
                tracing::error!(
                    target: TRACING_TARGET_SHUTDOWN,
                    error = %format!("{error:#}"),
                    "command failed"
                );
            } else {
                eprintln!("Error: {error:#}");
            }
            1
        }
    };
    process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    commands::execute(cli).await
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
