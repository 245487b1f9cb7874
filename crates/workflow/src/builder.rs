//! Fluent builder for constructing and validating workflow definitions.

use strata_core::{NodeId, WorkflowId};

use crate::connection::Connection;
use crate::definition::WorkflowDefinition;
use crate::error::ValidationError;
use crate::node::NodeDefinition;
use crate::validate::validate_workflow;

/// Accumulates nodes and connections, then validates and produces a
/// [`WorkflowDefinition`].
pub struct WorkflowBuilder {
    definition: WorkflowDefinition,
}

impl WorkflowBuilder {
    /// Start building a workflow with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            definition: WorkflowDefinition::new(name),
        }
    }

    /// Override the auto-generated workflow ID.
    #[must_use]
    pub fn id(mut self, id: WorkflowId) -> Self {
        self.definition.id = id;
        self
    }

    /// Set the workflow description.
    #[must_use]
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.definition.description = Some(desc.into());
        self
    }

    /// Add a node. Declaration order follows call order.
    #[must_use]
    pub fn add_node(mut self, node: NodeDefinition) -> Self {
        self.definition.nodes.push(node);
        self
    }

    /// Connect `from.from_port` to `to.to_port` with the default propagating policy.
    #[must_use]
    pub fn connect(
        self,
        from: NodeId,
        from_port: impl Into<String>,
        to: NodeId,
        to_port: impl Into<String>,
    ) -> Self {
        self.connection(Connection::new(from, from_port, to, to_port))
    }

    /// Add a fully specified connection.
    #[must_use]
    pub fn connection(mut self, connection: Connection) -> Self {
        self.definition.connections.push(connection);
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.definition.tags.push(tag.into());
        self
    }

    /// Consume the builder, validate the workflow, and return the definition.
    pub fn build(self) -> Result<WorkflowDefinition, ValidationError> {
        validate_workflow(&self.definition)?;
        Ok(self.definition)
    }

    /// Consume the builder without validating.
    #[must_use]
    pub fn build_unchecked(self) -> WorkflowDefinition {
        self.definition
    }
}
