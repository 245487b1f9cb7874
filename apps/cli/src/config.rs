//! Run configuration loading.
//!
//! Layers, lowest to highest precedence:
//!
//! ```text
//! RunConfig::default()
//! └── strata.toml (or --config)
//!     └── STRATA_* environment variables
//!         └── command-line flags
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::Serialize;
use strata_engine::{RunConfig, StrategyKind};

use crate::cli::RunArgs;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "strata.toml";

/// Flag values that were actually given.
#[derive(Debug, Default, Serialize)]
struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    strategy: Option<StrategyKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_budget: Option<u64>,
    /// Milliseconds, matching the file format.
    #[serde(skip_serializing_if = "Option::is_none")]
    default_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage_barrier: Option<bool>,
}

impl From<&RunArgs> for Overrides {
    fn from(args: &RunArgs) -> Self {
        Self {
            max_concurrency: args.concurrency,
            strategy: args.strategy,
            memory_budget: args.memory_budget,
            default_timeout: args.timeout_ms,
            stage_barrier: args.stage_barrier.then_some(true),
        }
    }
}

/// Build the run config from every layer and validate it.
pub fn load(explicit: Option<&Path>, args: &RunArgs) -> anyhow::Result<RunConfig> {
    let file: PathBuf = match explicit {
        Some(path) if !path.exists() => bail!("config file {} not found", path.display()),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(DEFAULT_CONFIG_FILE),
    };

    let config: RunConfig = Figment::from(Serialized::defaults(RunConfig::default()))
        .merge(Toml::file(&file))
        .merge(Env::prefixed("STRATA_").split("__"))
        .merge(Serialized::defaults(Overrides::from(args)))
        .extract()
        .with_context(|| format!("failed to load run config (file: {})", file.display()))?;

    config.validate().context("invalid run config")?;
    tracing::debug!(
        file = %file.display(),
        max_concurrency = config.max_concurrency,
        strategy = %config.strategy,
        stage_barrier = config.stage_barrier,
        "run config loaded"
    );
    Ok(config)
}
