//! The node plugin contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_core::{NodeId, RunId, TypeTag};
use strata_execution::{DataPacket, Payload};
use strata_workflow::{
    FailurePolicy, NodeCategory, NodeDefinition, ParameterSpec, PortSchema, ValidationError,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::PluginError;
use crate::limits::MemoryMeter;

/// Static metadata a plugin publishes about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Key nodes use to select this plugin.
    pub type_tag: TypeTag,
    /// Display name.
    pub name: String,
    /// Category used by round-robin scheduling.
    #[serde(default)]
    pub category: NodeCategory,
    /// Declared input ports.
    #[serde(default)]
    pub inputs: Vec<PortSchema>,
    /// Declared output ports.
    #[serde(default)]
    pub outputs: Vec<PortSchema>,
    /// Declared parameters.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Failure policy for nodes that do not set their own.
    #[serde(default)]
    pub default_policy: Option<FailurePolicy>,
    /// `false` if running twice may duplicate side effects.
    #[serde(default = "default_true")]
    pub idempotent: bool,
    /// Optional longer description.
    #[serde(default)]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl PluginDescriptor {
    /// Create a descriptor with no ports.
    #[must_use]
    pub fn new(type_tag: TypeTag, name: impl Into<String>) -> Self {
        Self {
            type_tag,
            name: name.into(),
            category: NodeCategory::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
            default_policy: None,
            idempotent: true,
            description: None,
        }
    }

    /// Set the category.
    #[must_use]
    pub fn with_category(mut self, category: NodeCategory) -> Self {
        self.category = category;
        self
    }

    /// Add an input port.
    #[must_use]
    pub fn with_input(mut self, port: PortSchema) -> Self {
        self.inputs.push(port);
        self
    }

    /// Add an output port.
    #[must_use]
    pub fn with_output(mut self, port: PortSchema) -> Self {
        self.outputs.push(port);
        self
    }

    /// Add a parameter declaration.
    #[must_use]
    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    /// Set the default failure policy.
    #[must_use]
    pub fn with_default_policy(mut self, policy: FailurePolicy) -> Self {
        self.default_policy = Some(policy);
        self
    }

    /// Mark the plugin non-idempotent.
    #[must_use]
    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// A node definition pre-filled with this plugin's ports, parameter
    /// declarations, category, and idempotency.
    #[must_use]
    pub fn instantiate(&self, id: NodeId, name: impl Into<String>) -> NodeDefinition {
        let mut node = NodeDefinition::new(id, name, self.type_tag.clone())
            .with_category(self.category);
        node.inputs.clone_from(&self.inputs);
        node.outputs.clone_from(&self.outputs);
        node.parameter_specs.clone_from(&self.parameters);
        node.idempotent = self.idempotent;
        node
    }

    /// Compare a node's declared port names with this descriptor.
    ///
    /// Returns a description of the first difference, if any.
    pub fn port_mismatch(&self, node: &NodeDefinition) -> Option<String> {
        let names = |ports: &[PortSchema]| ports.iter().map(|p| p.name.clone()).collect::<Vec<_>>();
        let (node_in, plugin_in) = (names(&node.inputs), names(&self.inputs));
        if node_in != plugin_in {
            return Some(format!("inputs {node_in:?}, plugin declares {plugin_in:?}"));
        }
        let (node_out, plugin_out) = (names(&node.outputs), names(&self.outputs));
        if node_out != plugin_out {
            return Some(format!("outputs {node_out:?}, plugin declares {plugin_out:?}"));
        }
        None
    }

    /// Input port `name`, if declared.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&PortSchema> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Output port `name`, if declared.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&PortSchema> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Check `node`'s parameter values against this plugin's declarations.
    ///
    /// The node's own `parameter_specs` play no part: a graph that drops
    /// them is held to the same rules.
    pub fn parameter_violations<'a>(
        &'a self,
        node: &'a NodeDefinition,
    ) -> impl Iterator<Item = ValidationError> + 'a {
        self.parameters.iter().filter_map(move |spec| {
            let issue = spec.check(node.parameters.get(&spec.name)).err()?;
            Some(ValidationError::InvalidParameter {
                node: node.id,
                parameter: spec.name.clone(),
                issue,
            })
        })
    }
}

/// Everything a plugin receives for one attempt.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The node being executed.
    pub node_id: NodeId,
    /// The run it belongs to.
    pub run_id: RunId,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Complete input set keyed by input port. Tolerated absences are missing.
    pub inputs: IndexMap<String, Arc<DataPacket>>,
    /// Parameters with declared defaults filled in.
    pub params: IndexMap<String, Value>,
    /// Cooperative cancellation; poll at safe points.
    pub token: CancellationToken,
    /// Wall-clock deadline, if any.
    pub deadline: Option<Instant>,
    /// Working-memory accounting for this attempt.
    pub memory: MemoryMeter,
}

impl Invocation {
    /// A first attempt with no inputs, no deadline, and an unlimited meter.
    #[must_use]
    pub fn new(run_id: RunId, node_id: NodeId) -> Self {
        Self {
            node_id,
            run_id,
            attempt: 1,
            inputs: IndexMap::new(),
            params: IndexMap::new(),
            token: CancellationToken::new(),
            deadline: None,
            memory: MemoryMeter::unlimited(),
        }
    }

    /// Add an input packet.
    #[must_use]
    pub fn with_input(mut self, port: impl Into<String>, packet: Arc<DataPacket>) -> Self {
        self.inputs.insert(port.into(), packet);
        self
    }

    /// Add a parameter value.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Input packet on `port`.
    #[must_use]
    pub fn input(&self, port: &str) -> Option<&DataPacket> {
        self.inputs.get(port).map(Arc::as_ref)
    }

    /// Inline input value on `port`.
    #[must_use]
    pub fn input_value(&self, port: &str) -> Option<&Value> {
        self.input(port).and_then(DataPacket::value)
    }

    /// Parameter value.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Parameter as an unsigned integer, or a validation error.
    pub fn param_u64(&self, name: &str) -> Result<u64, PluginError> {
        self.param(name)
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                PluginError::validation(format!("parameter `{name}` must be a non-negative integer"))
            })
    }

    /// Parameter as a string, or a validation error.
    pub fn param_str(&self, name: &str) -> Result<&str, PluginError> {
        self.param(name)
            .and_then(Value::as_str)
            .ok_or_else(|| PluginError::validation(format!("parameter `{name}` must be a string")))
    }

    /// Returns `true` once the run or this attempt was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// Payloads produced by one attempt, keyed by output port.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutputs {
    ports: IndexMap<String, Payload>,
}

impl NodeOutputs {
    /// No outputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One inline value on one port.
    #[must_use]
    pub fn single(port: impl Into<String>, value: Value) -> Self {
        Self::new().with_value(port, value)
    }

    /// Add an inline value.
    #[must_use]
    pub fn with_value(self, port: impl Into<String>, value: Value) -> Self {
        self.with_payload(port, Payload::inline(value))
    }

    /// Add a payload.
    #[must_use]
    pub fn with_payload(mut self, port: impl Into<String>, payload: Payload) -> Self {
        self.ports.insert(port.into(), payload);
        self
    }

    /// Payload on `port`.
    #[must_use]
    pub fn get(&self, port: &str) -> Option<&Payload> {
        self.ports.get(port)
    }

    /// Port names in insertion order.
    pub fn port_names(&self) -> impl Iterator<Item = &str> {
        self.ports.keys().map(String::as_str)
    }

    /// Number of ports with a payload.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Returns `true` if no port has a payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Sum of the payload sizes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.ports.values().map(Payload::size_bytes).sum()
    }
}

impl IntoIterator for NodeOutputs {
    type Item = (String, Payload);
    type IntoIter = indexmap::map::IntoIter<String, Payload>;

    fn into_iter(self) -> Self::IntoIter {
        self.ports.into_iter()
    }
}

impl FromIterator<(String, Payload)> for NodeOutputs {
    fn from_iter<I: IntoIterator<Item = (String, Payload)>>(iter: I) -> Self {
        Self {
            ports: iter.into_iter().collect(),
        }
    }
}

/// A processing unit the engine can run.
///
/// One flat capability: metadata plus `execute`. Shared behaviour such as
/// parameter checks lives in helper functions, not in a base type.
#[async_trait]
pub trait NodePlugin: Send + Sync {
    /// Static metadata.
    fn descriptor(&self) -> &PluginDescriptor;

    /// Run one attempt. Long-running work should poll `invocation.token` and
    /// return [`PluginError::Cancelled`] when it fires.
    async fn execute(&self, invocation: Invocation) -> Result<NodeOutputs, PluginError>;
}
