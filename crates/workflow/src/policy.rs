//! Per-node retry and failure policy.

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Retry policy with configurable exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_multiplier: f64,
    /// Randomize each delay by up to ±`jitter` of its value (0.0 ..= 1.0).
    #[serde(default)]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::exponential(3, 100, 5_000)
    }
}

impl RetryConfig {
    /// A single attempt, no retry.
    #[must_use]
    pub fn none() -> Self {
        Self::fixed(1, 0)
    }

    /// Create a fixed-delay retry policy.
    #[must_use]
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Create an exponential-backoff retry policy (multiplier = 2.0).
    #[must_use]
    pub fn exponential(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }

    /// Set the jitter fraction, clamped to `0.0 ..= 1.0`.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Attempt ceiling, never below one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Calculate the un-jittered delay after the given failed attempt (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = delay_ms.min(self.max_delay_ms as f64).max(0.0) as u64;
        Duration::from_millis(capped)
    }
}

/// What to do once every retry attempt has failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExhaustedAction {
    /// Mark every transitive dependent Skipped; independent branches continue.
    #[default]
    SkipDownstream,
    /// Cancel the whole run.
    AbortWorkflow,
    /// Publish the given packets in place of the node's outputs so
    /// dependents still execute.
    ContinueWithDefault {
        /// Default payload per output port name.
        outputs: IndexMap<String, serde_json::Value>,
    },
}

impl std::fmt::Display for ExhaustedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SkipDownstream => write!(f, "skip-downstream"),
            Self::AbortWorkflow => write!(f, "abort-workflow"),
            Self::ContinueWithDefault { .. } => write!(f, "continue-with-default"),
        }
    }
}

/// Per-node failure policy. The default is retry-then-propagate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailurePolicy {
    /// Retry behaviour for failed attempts.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Consequence once retries are exhausted.
    #[serde(default)]
    pub on_exhausted: ExhaustedAction,
}

impl FailurePolicy {
    /// Retry per `retry`, then skip downstream.
    #[must_use]
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            on_exhausted: ExhaustedAction::SkipDownstream,
        }
    }

    /// Fail the run once retries are exhausted.
    #[must_use]
    pub fn abort_workflow(mut self) -> Self {
        self.on_exhausted = ExhaustedAction::AbortWorkflow;
        self
    }

    /// Inject the given defaults once retries are exhausted.
    #[must_use]
    pub fn continue_with_default(
        mut self,
        outputs: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Self {
        self.on_exhausted = ExhaustedAction::ContinueWithDefault {
            outputs: outputs.into_iter().collect(),
        };
        self
    }
}
