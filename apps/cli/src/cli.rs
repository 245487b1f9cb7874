//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use strata_engine::StrategyKind;

/// Strata workflow engine.
#[derive(Debug, Parser)]
#[command(name = "strata")]
#[command(about = "Validate, plan, and run Strata workflow graphs")]
#[command(version)]
pub struct Cli {
    /// Log filter, e.g. `info` or `strata_engine=debug`. `RUST_LOG` wins if set.
    #[arg(long, global = true, env = "STRATA_LOG", default_value = "warn")]
    pub log_level: String,

    /// Run config file. Defaults to `strata.toml` in the working directory.
    #[arg(long, global = true, env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check a workflow graph and list every problem found.
    Validate {
        /// Workflow graph in JSON.
        graph: PathBuf,
    },
    /// Print the execution plan of a workflow graph as JSON.
    Plan {
        /// Workflow graph in JSON.
        graph: PathBuf,
    },
    /// Run a workflow graph with the demo plugins and print the report.
    Run(RunArgs),
    /// Print a sample workflow graph that uses the demo plugins.
    Demo,
    /// List the demo plugins.
    Plugins,
}

/// Flags for `strata run`. Each one overrides the config file and environment.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Workflow graph in JSON.
    pub graph: PathBuf,

    /// Maximum nodes running at once.
    #[arg(long, short = 'c')]
    pub concurrency: Option<usize>,

    /// Dispatch strategy.
    #[arg(long, short = 's')]
    pub strategy: Option<StrategyKind>,

    /// Shared memory budget in bytes, checked against node memory estimates.
    /// Applies under every strategy.
    #[arg(long)]
    pub memory_budget: Option<u64>,

    /// Default per-node timeout in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Hold each stage until the previous one is finished.
    #[arg(long)]
    pub stage_barrier: bool,

    /// Stream run events to stderr as JSON lines.
    #[arg(long)]
    pub events: bool,
}
