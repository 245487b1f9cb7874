//! Run and engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_workflow::FailurePolicy;

use crate::strategy::StrategyKind;

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `max_concurrency` must be at least one.
    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,

    /// `event_capacity` must be at least one.
    #[error("event_capacity must be at least 1")]
    ZeroEventCapacity,

    /// A byte or duration ceiling was set to zero.
    #[error("{field} must be greater than zero when set")]
    ZeroLimit {
        /// The offending field.
        field: &'static str,
    },

    /// The default retry policy is out of range.
    #[error("default failure policy is invalid: {0}")]
    InvalidPolicy(String),
}

/// Settings for a single run.
///
/// Every field has a default, so a partial TOML or JSON document
/// deserializes into a complete config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Concurrency ceiling: maximum nodes Running at once.
    pub max_concurrency: usize,
    /// Memory budget shared by in-flight nodes, in bytes, summed over their
    /// memory estimates.
    ///
    /// Every strategy holds its pick while it would overrun the budget and
    /// something else is running. Resource-aware scheduling also looks past
    /// the head of the queue for a node that fits.
    pub memory_budget: Option<u64>,
    /// Row budget shared by in-flight nodes, gated like `memory_budget`.
    pub row_budget: Option<u64>,
    /// Per-invocation memory ceiling for nodes without their own.
    pub node_memory_limit: Option<u64>,
    /// Per-attempt wall-clock limit for nodes without their own.
    #[serde(with = "strata_workflow::serde_duration_opt")]
    pub default_timeout: Option<Duration>,
    /// Maximum total output size of one node, in bytes.
    pub max_output_bytes: u64,
    /// Dispatch strategy.
    pub strategy: StrategyKind,
    /// Failure policy for nodes whose node definition and plugin set none.
    pub default_failure_policy: FailurePolicy,
    /// Hold back stage `k + 1` until every stage-`k` node is terminal.
    pub stage_barrier: bool,
    /// Buffered events per subscriber before the oldest are dropped.
    pub event_capacity: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism().map_or(4, usize::from),
            memory_budget: None,
            row_budget: None,
            node_memory_limit: None,
            default_timeout: None,
            max_output_bytes: 10 * 1024 * 1024,
            strategy: StrategyKind::default(),
            default_failure_policy: FailurePolicy::default(),
            stage_barrier: false,
            event_capacity: 256,
        }
    }
}

impl RunConfig {
    /// Set the concurrency ceiling.
    #[must_use]
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    /// Set the shared memory budget.
    #[must_use]
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Set the shared row budget.
    #[must_use]
    pub fn with_row_budget(mut self, rows: u64) -> Self {
        self.row_budget = Some(rows);
        self
    }

    /// Set the default per-invocation memory ceiling.
    #[must_use]
    pub fn with_node_memory_limit(mut self, bytes: u64) -> Self {
        self.node_memory_limit = Some(bytes);
        self
    }

    /// Set the default per-attempt timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set the output ceiling.
    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: u64) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Set the dispatch strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the fallback failure policy.
    #[must_use]
    pub fn with_default_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.default_failure_policy = policy;
        self
    }

    /// Enable or disable the stage barrier.
    #[must_use]
    pub fn with_stage_barrier(mut self, enabled: bool) -> Self {
        self.stage_barrier = enabled;
        self
    }

    /// Set the event buffer size.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        if self.max_output_bytes == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "max_output_bytes",
            });
        }
        let zero_bytes = [
            ("memory_budget", self.memory_budget),
            ("row_budget", self.row_budget),
            ("node_memory_limit", self.node_memory_limit),
        ];
        if let Some(&(field, _)) = zero_bytes.iter().find(|(_, v)| *v == Some(0)) {
            return Err(ConfigError::ZeroLimit { field });
        }
        if self.default_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroLimit {
                field: "default_timeout",
            });
        }

        let retry = &self.default_failure_policy.retry;
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigError::InvalidPolicy(format!(
                "jitter {} outside 0.0..=1.0",
                retry.jitter
            )));
        }
        if retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidPolicy(format!(
                "backoff multiplier {} below 1.0",
                retry.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Engine-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Defaults for runs submitted without an explicit config.
    pub run: RunConfig,
    /// Refuse new submissions while this many runs are active.
    pub max_active_runs: Option<usize>,
}

impl EngineConfig {
    /// Check the run defaults and the engine limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_active_runs == Some(0) {
            return Err(ConfigError::ZeroLimit {
                field: "max_active_runs",
            });
        }
        self.run.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use strata_workflow::RetryConfig;

    #[test]
    fn defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.max_concurrency >= 1);
        assert_eq!(config.strategy, StrategyKind::Fifo);
        assert!(!config.stage_barrier);
        assert!(config.validate().is_ok());
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[rstest]
    #[case(RunConfig::default().with_max_concurrency(0), ConfigError::ZeroConcurrency)]
    #[case(RunConfig::default().with_event_capacity(0), ConfigError::ZeroEventCapacity)]
    #[case(
        RunConfig::default().with_memory_budget(0),
        ConfigError::ZeroLimit { field: "memory_budget" }
    )]
    #[case(
        RunConfig::default().with_default_timeout(Duration::ZERO),
        ConfigError::ZeroLimit { field: "default_timeout" }
    )]
    #[case(
        RunConfig::default().with_max_output_bytes(0),
        ConfigError::ZeroLimit { field: "max_output_bytes" }
    )]
    fn invalid_values_are_rejected(#[case] config: RunConfig, #[case] expected: ConfigError) {
        assert_eq!(config.validate().unwrap_err(), expected);
    }

    #[test]
    fn shrinking_backoff_is_rejected() {
        let mut retry = RetryConfig::exponential(3, 100, 1_000);
        retry.backoff_multiplier = 0.5;
        let config = RunConfig::default().with_default_failure_policy(FailurePolicy::new(retry));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn partial_document_fills_defaults() {
        let config: RunConfig = serde_json::from_value(serde_json::json!({
            "max_concurrency": 2,
            "strategy": "priority",
            "default_timeout": 1500
        }))
        .unwrap();
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.strategy, StrategyKind::Priority);
        assert_eq!(config.default_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn zero_active_runs_is_rejected() {
        let config = EngineConfig {
            max_active_runs: Some(0),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
