//! Edge (connection) types linking node ports.

use serde::{Deserialize, Serialize};
use strata_core::NodeId;

/// A directed edge from an output port of one node to an input port of another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// Source node.
    pub from_node: NodeId,
    /// Source output port.
    pub from_port: String,
    /// Target node.
    pub to_node: NodeId,
    /// Target input port.
    pub to_port: String,
    /// How a failed or skipped source affects the target.
    #[serde(default)]
    pub on_failure: EdgeFailurePolicy,
}

impl Connection {
    /// Create a propagating connection.
    #[must_use]
    pub fn new(
        from_node: NodeId,
        from_port: impl Into<String>,
        to_node: NodeId,
        to_port: impl Into<String>,
    ) -> Self {
        Self {
            from_node,
            from_port: from_port.into(),
            to_node,
            to_port: to_port.into(),
            on_failure: EdgeFailurePolicy::Propagate,
        }
    }

    /// Set the edge failure policy.
    #[must_use]
    pub fn with_policy(mut self, policy: EdgeFailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// Shorthand for `with_policy(EdgeFailurePolicy::Tolerate)`.
    #[must_use]
    pub fn tolerate(self) -> Self {
        self.with_policy(EdgeFailurePolicy::Tolerate)
    }

    /// Returns `true` if this connection forms a self-loop.
    #[must_use]
    pub fn is_self_loop(&self) -> bool {
        self.from_node == self.to_node
    }
}

/// Failure semantics of a single edge.
///
/// `Tolerate` only takes effect when the target port is optional
/// (`required: false`); on a required port it behaves like `Propagate`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeFailurePolicy {
    /// A failed or skipped source skips the target.
    #[default]
    Propagate,
    /// A failed or skipped source leaves the target port empty.
    Tolerate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_new_propagates() {
        let a = NodeId::v4();
        let b = NodeId::v4();
        let conn = Connection::new(a, "out", b, "in");
        assert_eq!(conn.from_node, a);
        assert_eq!(conn.from_port, "out");
        assert_eq!(conn.to_node, b);
        assert_eq!(conn.to_port, "in");
        assert_eq!(conn.on_failure, EdgeFailurePolicy::Propagate);
    }

    #[test]
    fn connection_is_self_loop() {
        let a = NodeId::v4();
        let b = NodeId::v4();
        assert!(Connection::new(a, "o", a, "i").is_self_loop());
        assert!(!Connection::new(a, "o", b, "i").is_self_loop());
    }

    #[test]
    fn on_failure_defaults_when_absent() {
        let a = NodeId::v4();
        let b = NodeId::v4();
        let json = serde_json::json!({
            "from_node": a, "from_port": "out", "to_node": b, "to_port": "in"
        });
        let conn: Connection = serde_json::from_value(json).unwrap();
        assert_eq!(conn.on_failure, EdgeFailurePolicy::Propagate);

        let tolerant = conn.tolerate();
        let value = serde_json::to_value(&tolerant).unwrap();
        assert_eq!(value["on_failure"], "tolerate");
    }
}
