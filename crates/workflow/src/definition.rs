//! Workflow-level definition types.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::{NodeId, WorkflowId};

use crate::connection::{Connection, EdgeFailurePolicy};
use crate::node::NodeDefinition;

/// A complete workflow graph: nodes in declaration order plus connections.
///
/// Declaration order is significant: it breaks scheduling ties and orders
/// nodes within a plan stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    /// Human-readable name.
    pub name: String,
    /// Optional longer description.
    #[serde(default)]
    pub description: Option<String>,
    /// The processing steps, in declaration order.
    pub nodes: Vec<NodeDefinition>,
    /// Port-to-port edges.
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Free-form tags for filtering and grouping.
    #[serde(default)]
    pub tags: Vec<String>,
    /// When this definition was first created.
    pub created_at: DateTime<Utc>,
    /// When this definition was last modified.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// An empty workflow with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::v4(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            connections: Vec::new(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Position of a node in declaration order.
    #[must_use]
    pub fn declaration_index(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Connections ending at `id`.
    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(move |c| c.to_node == id)
    }

    /// Connections leaving `id`.
    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(move |c| c.from_node == id)
    }

    /// Returns `true` if a failed or skipped source skips the target of
    /// `connection`. Tolerated edges only stop propagation on optional ports.
    #[must_use]
    pub fn propagates_failure(&self, connection: &Connection) -> bool {
        match connection.on_failure {
            EdgeFailurePolicy::Propagate => true,
            EdgeFailurePolicy::Tolerate => self
                .node(connection.to_node)
                .and_then(|n| n.input(&connection.to_port))
                .is_none_or(|port| port.required),
        }
    }

    /// Hash of the graph structure: node ids and type tags in declaration
    /// order, declared ports, and every connection with its policy.
    ///
    /// Parameter values, hints, and node policies do not contribute, so a
    /// parameter-only edit keeps the fingerprint. The value is only stable
    /// within one process.
    #[must_use]
    pub fn structure_fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.nodes.len().hash(&mut hasher);
        for node in &self.nodes {
            node.id.hash(&mut hasher);
            node.type_tag.hash(&mut hasher);
            for port in node.inputs.iter().chain(&node.outputs) {
                port.name.hash(&mut hasher);
                port.data_type.hash(&mut hasher);
                port.required.hash(&mut hasher);
            }
            node.inputs.len().hash(&mut hasher);
        }
        self.connections.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{DataType, PortSchema};
    use strata_core::TypeTag;

    fn two_node_workflow() -> (WorkflowDefinition, NodeId, NodeId) {
        let a = NodeId::v4();
        let b = NodeId::v4();
        let mut wf = WorkflowDefinition::new("wf");
        wf.nodes.push(
            NodeDefinition::new(a, "a", TypeTag::new("constant").unwrap())
                .with_output(PortSchema::new("out", DataType::Number)),
        );
        wf.nodes.push(
            NodeDefinition::new(b, "b", TypeTag::new("passthrough").unwrap())
                .with_input(PortSchema::new("in", DataType::Number))
                .with_output(PortSchema::new("out", DataType::Number)),
        );
        wf.connections.push(Connection::new(a, "out", b, "in"));
        (wf, a, b)
    }

    #[test]
    fn tolerate_only_stops_propagation_on_optional_ports() {
        let (mut wf, a, b) = two_node_workflow();
        assert!(wf.propagates_failure(&wf.connections[0]));

        let tolerated = Connection::new(a, "out", b, "in").tolerate();
        assert!(wf.propagates_failure(&tolerated));

        wf.nodes[1].inputs[0].required = false;
        assert!(!wf.propagates_failure(&tolerated));
    }

    #[test]
    fn lookups() {
        let (wf, a, b) = two_node_workflow();
        assert_eq!(wf.node(b).map(|n| n.name.as_str()), Some("b"));
        assert_eq!(wf.declaration_index(a), Some(0));
        assert_eq!(wf.declaration_index(NodeId::v4()), None);
        assert_eq!(wf.incoming(b).count(), 1);
        assert_eq!(wf.outgoing(b).count(), 0);
    }

    #[test]
    fn parameter_edit_keeps_fingerprint() {
        let (mut wf, a, _) = two_node_workflow();
        let before = wf.structure_fingerprint();
        wf.nodes[0]
            .parameters
            .insert("value".into(), serde_json::json!(42));
        wf.nodes[0].hints.priority = 9;
        assert_eq!(wf.structure_fingerprint(), before);
        assert_eq!(wf.node(a).unwrap().parameters.len(), 1);
    }

    #[test]
    fn structural_edit_changes_fingerprint() {
        let (mut wf, _, _) = two_node_workflow();
        let before = wf.structure_fingerprint();
        wf.connections.clear();
        assert_ne!(wf.structure_fingerprint(), before);
    }

    #[test]
    fn edge_policy_edit_changes_fingerprint() {
        let (mut wf, _, _) = two_node_workflow();
        let before = wf.structure_fingerprint();
        wf.connections[0] = wf.connections[0].clone().tolerate();
        assert_ne!(wf.structure_fingerprint(), before);
    }

    #[test]
    fn serde_roundtrip() {
        let (wf, _, _) = two_node_workflow();
        let json = serde_json::to_string(&wf).unwrap();
        let back: WorkflowDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wf);
    }
}
