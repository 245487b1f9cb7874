//! Validation error types.

use serde::{Deserialize, Serialize};
use strata_core::NodeId;
use thiserror::Error;

use crate::parameter::ParameterIssue;
use crate::port::DataType;

/// Which side of a node a port lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    /// An input port.
    Input,
    /// An output port.
    Output,
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Reasons a workflow graph is rejected before any execution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Workflow must have at least one node.
    #[error("workflow must have at least one node")]
    EmptyGraph,

    /// Duplicate node id found.
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(NodeId),

    /// Connection references a node that does not exist.
    #[error("connection references unknown node: {0}")]
    UnknownNode(NodeId),

    /// Connection references a port the node does not declare.
    #[error("node {node} has no {direction} port named `{port}`")]
    UnknownPort {
        /// The node missing the port.
        node: NodeId,
        /// The referenced port name.
        port: String,
        /// Input or output.
        direction: PortDirection,
    },

    /// Two connections end at the same input port.
    #[error("input port `{port}` of node {node} has more than one incoming connection")]
    DuplicateInput {
        /// The target node.
        node: NodeId,
        /// The doubly-connected port.
        port: String,
    },

    /// The graph contains a cycle. `cycle` lists the nodes on it in edge
    /// order; the last node connects back to the first.
    #[error("cycle detected: {}", format_cycle(.cycle))]
    CyclicGraph {
        /// Nodes on the cycle.
        cycle: Vec<NodeId>,
    },

    /// An edge joins ports of incompatible types.
    #[error(
        "type mismatch on {from_node}.{from_port} -> {to_node}.{to_port}: \
         {expected} port cannot accept {found}"
    )]
    TypeMismatch {
        /// Source node.
        from_node: NodeId,
        /// Source port.
        from_port: String,
        /// Target node.
        to_node: NodeId,
        /// Target port.
        to_port: String,
        /// Type declared by the target port.
        expected: DataType,
        /// Type produced by the source port.
        found: DataType,
    },

    /// A required input port has no incoming connection.
    #[error("required input `{port}` of node {node} has no incoming connection")]
    MissingConnection {
        /// The node.
        node: NodeId,
        /// The unconnected port.
        port: String,
    },

    /// A parameter value is missing or violates its declaration.
    #[error("invalid parameter `{parameter}` on node {node}: {issue}")]
    InvalidParameter {
        /// The node.
        node: NodeId,
        /// The parameter name.
        parameter: String,
        /// What is wrong with it.
        issue: ParameterIssue,
    },

    /// An enabled, non-optional node cannot be reached from any source node.
    #[error("node {0} is not reachable from any source node")]
    UnreachableNode(NodeId),
}

impl ValidationError {
    /// Returns `true` for errors that make the graph impossible to build
    /// (unknown ids, ports, duplicates), as opposed to semantic errors.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::EmptyGraph
                | Self::DuplicateNodeId(_)
                | Self::UnknownNode(_)
                | Self::UnknownPort { .. }
                | Self::DuplicateInput { .. }
        )
    }
}

fn format_cycle(cycle: &[NodeId]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}
