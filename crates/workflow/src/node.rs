//! Node (processing step) definition within a workflow.

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strata_core::{NodeId, TypeTag};

use crate::parameter::ParameterSpec;
use crate::policy::FailurePolicy;
use crate::port::PortSchema;

/// Broad family a node belongs to. Used by round-robin scheduling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Reads data into the workflow.
    Input,
    /// Transforms data.
    #[default]
    Processing,
    /// Writes or displays results.
    Output,
    /// Auxiliary utility step.
    Tool,
}

impl std::fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Processing => write!(f, "processing"),
            Self::Output => write!(f, "output"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// Scheduling hints read by the selection strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingHints {
    /// User-assigned weight; higher runs first under priority scheduling.
    #[serde(default)]
    pub priority: i32,
    /// SLA relative to run start, for deadline-aware scheduling.
    #[serde(default, with = "crate::serde_duration_opt")]
    pub deadline: Option<Duration>,
    /// Expected peak memory in bytes.
    #[serde(default)]
    pub memory_estimate: u64,
    /// Expected number of rows processed.
    #[serde(default)]
    pub row_estimate: u64,
}

/// A single processing step inside a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique node identifier within this workflow.
    pub id: NodeId,
    /// Human-readable label.
    pub name: String,
    /// Which plugin this node runs.
    pub type_tag: TypeTag,
    /// Node family.
    #[serde(default)]
    pub category: NodeCategory,
    /// Parameter values passed to the plugin.
    #[serde(default)]
    pub parameters: IndexMap<String, serde_json::Value>,
    /// Declared parameters and their constraints.
    #[serde(default)]
    pub parameter_specs: Vec<ParameterSpec>,
    /// Declared input ports.
    #[serde(default)]
    pub inputs: Vec<PortSchema>,
    /// Declared output ports.
    #[serde(default)]
    pub outputs: Vec<PortSchema>,
    /// Hints for the scheduler.
    #[serde(default)]
    pub hints: SchedulingHints,
    /// Node-level failure policy (overrides plugin and run defaults).
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
    /// Whether re-running the node after a timeout is safe.
    #[serde(default = "default_true")]
    pub idempotent: bool,
    /// Disabled nodes never run and end Skipped.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Optional nodes may be unreachable from any source node.
    #[serde(default)]
    pub optional: bool,
    /// Node-level timeout (overrides the run default).
    #[serde(default, with = "crate::serde_duration_opt")]
    pub timeout: Option<Duration>,
    /// Node-level memory ceiling in bytes (overrides the run default).
    #[serde(default)]
    pub memory_limit: Option<u64>,
    /// Optional description of what this node does.
    #[serde(default)]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl NodeDefinition {
    /// Create a minimal node definition with no ports or parameters.
    #[must_use]
    pub fn new(id: NodeId, name: impl Into<String>, type_tag: TypeTag) -> Self {
        Self {
            id,
            name: name.into(),
            type_tag,
            category: NodeCategory::default(),
            parameters: IndexMap::new(),
            parameter_specs: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            hints: SchedulingHints::default(),
            failure_policy: None,
            idempotent: true,
            enabled: true,
            optional: false,
            timeout: None,
            memory_limit: None,
            description: None,
        }
    }

    /// Set the category.
    #[must_use]
    pub fn with_category(mut self, category: NodeCategory) -> Self {
        self.category = category;
        self
    }

    /// Add a parameter value.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Declare a parameter.
    #[must_use]
    pub fn with_parameter_spec(mut self, spec: ParameterSpec) -> Self {
        self.parameter_specs.push(spec);
        self
    }

    /// Declare an input port.
    #[must_use]
    pub fn with_input(mut self, port: PortSchema) -> Self {
        self.inputs.push(port);
        self
    }

    /// Declare an output port.
    #[must_use]
    pub fn with_output(mut self, port: PortSchema) -> Self {
        self.outputs.push(port);
        self
    }

    /// Set the scheduling priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.hints.priority = priority;
        self
    }

    /// Set the SLA deadline relative to run start.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.hints.deadline = Some(deadline);
        self
    }

    /// Set memory and row estimates.
    #[must_use]
    pub fn with_estimates(mut self, memory_bytes: u64, rows: u64) -> Self {
        self.hints.memory_estimate = memory_bytes;
        self.hints.row_estimate = rows;
        self
    }

    /// Set a node-level failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    /// Mark the node as having side effects that must not be repeated.
    #[must_use]
    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }

    /// Disable the node.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Allow the node to be unreachable from source nodes.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Set a node-level timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a node-level memory ceiling.
    #[must_use]
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Set a description.
    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Look up an input port by name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&PortSchema> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Look up an output port by name.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&PortSchema> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// A source node declares no input ports.
    #[must_use]
    pub fn is_source(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Parameter values with declared defaults filled in.
    #[must_use]
    pub fn resolved_parameters(&self) -> IndexMap<String, serde_json::Value> {
        let mut resolved = self.parameters.clone();
        for spec in &self.parameter_specs {
            if let Some(default) = &spec.default
                && resolved.get(&spec.name).is_none_or(serde_json::Value::is_null)
            {
                resolved.insert(spec.name.clone(), default.clone());
            }
        }
        resolved
    }
}
