//! State machine transition validation for run and node states.

use strata_workflow::NodeState;

use crate::error::ExecutionError;
use crate::status::RunStatus;

/// Returns `true` if the run-level transition from `from` to `to` is valid.
#[must_use]
pub fn can_transition_run(from: RunStatus, to: RunStatus) -> bool {
    matches!(
        (from, to),
        (RunStatus::Created, RunStatus::Running)
            | (RunStatus::Created, RunStatus::Cancelled)
            | (RunStatus::Created, RunStatus::Failed)
            | (RunStatus::Running, RunStatus::Paused)
            | (RunStatus::Running, RunStatus::Cancelling)
            | (RunStatus::Running, RunStatus::Completed)
            | (RunStatus::Running, RunStatus::CompletedWithFailures)
            | (RunStatus::Running, RunStatus::Aborted)
            | (RunStatus::Running, RunStatus::Failed)
            | (RunStatus::Paused, RunStatus::Running)
            | (RunStatus::Paused, RunStatus::Cancelling)
            | (RunStatus::Paused, RunStatus::Completed)
            | (RunStatus::Paused, RunStatus::CompletedWithFailures)
            | (RunStatus::Paused, RunStatus::Aborted)
            | (RunStatus::Paused, RunStatus::Failed)
            | (RunStatus::Cancelling, RunStatus::Cancelled)
            | (RunStatus::Cancelling, RunStatus::Failed)
    )
}

/// Validate a run-level transition, returning an error if invalid.
pub fn validate_run_transition(from: RunStatus, to: RunStatus) -> Result<(), ExecutionError> {
    if can_transition_run(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::invalid_run_transition(from, to))
    }
}

/// Returns `true` if the node-level transition from `from` to `to` is valid.
///
/// Progress is monotonic; `Running → Skipped` covers cooperatively
/// interrupted nodes.
#[must_use]
pub fn can_transition_node(from: NodeState, to: NodeState) -> bool {
    matches!(
        (from, to),
        (NodeState::Pending, NodeState::Ready)
            | (NodeState::Pending, NodeState::Skipped)
            | (NodeState::Ready, NodeState::Running)
            | (NodeState::Ready, NodeState::Skipped)
            | (NodeState::Running, NodeState::Succeeded)
            | (NodeState::Running, NodeState::Failed)
            | (NodeState::Running, NodeState::Skipped)
    )
}

/// Validate a node-level transition, returning an error if invalid.
pub fn validate_node_transition(from: NodeState, to: NodeState) -> Result<(), ExecutionError> {
    if can_transition_node(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
