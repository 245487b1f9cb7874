//! Engine error types.

use serde::{Deserialize, Serialize};
use strata_core::{NodeId, RunId};

use crate::config::ConfigError;

/// An internal consistency failure that ends a run as `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("engine fault{}: {detail}", location(.node, .stage, .attempts))]
pub struct EngineFault {
    /// The node being handled, if known.
    pub node: Option<NodeId>,
    /// Its plan stage, if known.
    pub stage: Option<usize>,
    /// Attempts the node had made.
    pub attempts: u32,
    /// What went wrong.
    pub detail: String,
}

fn location(node: &Option<NodeId>, stage: &Option<usize>, attempts: &u32) -> String {
    match (node, stage) {
        (Some(n), Some(s)) => format!(" at node {n} (stage {s}, {attempts} attempts)"),
        (Some(n), None) => format!(" at node {n} ({attempts} attempts)"),
        _ => String::new(),
    }
}

/// Errors from the engine control API.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The workflow failed validation.
    #[error("workflow rejected: {0}")]
    Validation(#[from] strata_workflow::ValidationError),

    /// A node's plugin is missing or does not match.
    #[error("plugin lookup failed: {0}")]
    Registry(#[from] strata_runtime::RegistryError),

    /// The run config is invalid.
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),

    /// Planning or state bookkeeping failed.
    #[error("execution error: {0}")]
    Execution(#[from] strata_execution::ExecutionError),

    /// No run with this id is known.
    #[error("unknown run {0}")]
    UnknownRun(RunId),

    /// The run already reached a terminal status.
    #[error("run {0} has already finished")]
    RunFinished(RunId),

    /// The run is still active.
    #[error("run {0} is still active")]
    RunActive(RunId),

    /// The run's dispatch loop ended without a report.
    #[error("run {0} was lost before it finished")]
    RunLost(RunId),

    /// Too many runs are active.
    #[error("active run limit of {limit} reached")]
    TooManyRuns {
        /// Configured limit.
        limit: usize,
    },

    /// `submit` was called outside a Tokio runtime.
    #[error("no Tokio runtime available to drive the run")]
    NoRuntime,

    /// An internal consistency failure.
    #[error(transparent)]
    Fault(#[from] EngineFault),
}
