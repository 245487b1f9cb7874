//! Failure records kept per run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::NodeId;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The plugin reported a failure.
    Execution,
    /// The wall-clock deadline passed.
    Timeout,
    /// The memory or output ceiling was exceeded.
    ResourceExhausted,
    /// The invocation observed cancellation and stopped.
    Cancelled,
    /// A consistency failure inside the engine.
    EngineFault,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execution => write!(f, "execution"),
            Self::Timeout => write!(f, "timeout"),
            Self::ResourceExhausted => write!(f, "resource_exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::EngineFault => write!(f, "engine_fault"),
        }
    }
}

/// What the engine did about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consequence {
    /// Another attempt follows.
    Retried,
    /// The node failed and its dependents were skipped.
    SkippedDownstream,
    /// The whole run was aborted.
    AbortedRun,
    /// Default outputs were published in place of the node's own.
    DefaultInjected,
    /// The attempt was interrupted by cancellation.
    Interrupted,
}

impl std::fmt::Display for Consequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retried => write!(f, "retried"),
            Self::SkippedDownstream => write!(f, "skipped_downstream"),
            Self::AbortedRun => write!(f, "aborted_run"),
            Self::DefaultInjected => write!(f, "default_injected"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// One failed attempt and its consequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// The failing node.
    pub node_id: NodeId,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// When the failure was observed.
    pub at: DateTime<Utc>,
    /// What the engine did about it.
    pub consequence: Consequence,
    /// Nodes skipped as a result, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<NodeId>,
}

impl ErrorRecord {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(
        node_id: NodeId,
        attempt: u32,
        kind: ErrorKind,
        message: impl Into<String>,
        consequence: Consequence,
    ) -> Self {
        Self {
            node_id,
            attempt,
            kind,
            message: message.into(),
            at: Utc::now(),
            consequence,
            skipped: Vec::new(),
        }
    }

    /// Attach the nodes skipped because of this failure.
    #[must_use]
    pub fn with_skipped(mut self, skipped: Vec<NodeId>) -> Self {
        self.skipped = skipped;
        self
    }

    /// Returns `true` if this failure ended the run.
    #[must_use]
    pub fn ended_run(&self) -> bool {
        matches!(self.consequence, Consequence::AbortedRun)
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "node {} attempt {}: {} ({}; {})",
            self.node_id, self.attempt, self.message, self.kind, self.consequence
        )
    }
}
