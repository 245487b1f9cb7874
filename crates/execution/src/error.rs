//! Execution error types.

use strata_core::NodeId;
use strata_workflow::ValidationError;
use thiserror::Error;

use crate::status::RunStatus;

/// Errors raised by plan construction, run bookkeeping, and data flow.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A state transition is not valid for the current state.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// A referenced node does not exist in this run.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// The graph could not be planned.
    #[error("plan computation failed: {0}")]
    Plan(#[from] ValidationError),

    /// A producer port already published a packet in this run.
    #[error("node {node} already published a packet on port `{port}`")]
    DuplicatePacket {
        /// The producer.
        node: NodeId,
        /// The output port.
        port: String,
    },

    /// A skipped node attempted to publish.
    #[error("skipped node {0} cannot publish packets")]
    SkippedProducer(NodeId),

    /// An input port was settled twice.
    #[error("input port `{port}` of node {node} was already settled")]
    DuplicateDelivery {
        /// The consumer.
        node: NodeId,
        /// The input port.
        port: String,
    },

    /// A delivery targets a port that no connection feeds.
    #[error("node {node} has no connected input port `{port}`")]
    UnexpectedPort {
        /// The consumer.
        node: NodeId,
        /// The input port.
        port: String,
    },

    /// Inputs were requested for a node whose input set is not complete.
    #[error("inputs of node {0} are not complete")]
    InputsIncomplete(NodeId),

    /// A serialization or deserialization error.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExecutionError {
    /// Create an invalid-transition error from run statuses.
    pub fn invalid_run_transition(from: RunStatus, to: RunStatus) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_display() {
        let err = ExecutionError::invalid_run_transition(RunStatus::Running, RunStatus::Created);
        assert_eq!(
            err.to_string(),
            "invalid transition from running to created"
        );
    }

    #[test]
    fn plan_error_wraps_validation() {
        let err = ExecutionError::from(ValidationError::EmptyGraph);
        assert_eq!(
            err.to_string(),
            "plan computation failed: workflow must have at least one node"
        );
    }

    #[test]
    fn duplicate_packet_display() {
        let id = NodeId::nil();
        let err = ExecutionError::DuplicatePacket {
            node: id,
            port: "out".into(),
        };
        assert!(err.to_string().contains("already published"));
        assert!(err.to_string().contains("`out`"));
    }

    #[test]
    fn from_serde_error() {
        let serde_err = serde_json::from_str::<String>("not valid json").unwrap_err();
        let err = ExecutionError::from(serde_err);
        assert!(err.to_string().starts_with("serialization:"));
    }
}
