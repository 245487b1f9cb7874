//! Built-in plugins the CLI can run.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use strata_core::{NodeId, TypeTag};
use strata_runtime::{
    Invocation, NodeOutputs, NodePlugin, PluginDescriptor, PluginError, PluginRegistry,
};
use strata_workflow::{
    DataType, NodeCategory, ParameterKind, ParameterSpec, PortSchema, WorkflowBuilder,
    WorkflowDefinition,
};

fn tag(raw: &'static str) -> anyhow::Result<TypeTag> {
    Ok(TypeTag::new(raw)?)
}

/// Emits its `value` parameter.
struct Constant {
    desc: PluginDescriptor,
}

impl Constant {
    fn new() -> anyhow::Result<Self> {
        let desc = PluginDescriptor::new(tag("constant")?, "Constant")
            .with_category(NodeCategory::Input)
            .with_output(PortSchema::new("out", DataType::Any))
            .with_parameter(ParameterSpec::new("value", ParameterKind::Json).with_default(json!(null)))
            .with_description("Emit a fixed JSON value");
        Ok(Self { desc })
    }
}

#[async_trait]
impl NodePlugin for Constant {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.desc
    }

    async fn execute(&self, inv: Invocation) -> Result<NodeOutputs, PluginError> {
        let value = inv.param("value").cloned().unwrap_or(Value::Null);
        Ok(NodeOutputs::single("out", value))
    }
}

/// Forwards its input unchanged.
struct Passthrough {
    desc: PluginDescriptor,
}

impl Passthrough {
    fn new() -> anyhow::Result<Self> {
        let desc = PluginDescriptor::new(tag("passthrough")?, "Passthrough")
            .with_input(PortSchema::new("in", DataType::Any))
            .with_output(PortSchema::new("out", DataType::Any))
            .with_description("Forward the input value");
        Ok(Self { desc })
    }
}

#[async_trait]
impl NodePlugin for Passthrough {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.desc
    }

    async fn execute(&self, inv: Invocation) -> Result<NodeOutputs, PluginError> {
        let value = inv
            .input_value("in")
            .cloned()
            .ok_or_else(|| PluginError::validation("input `in` is missing"))?;
        Ok(NodeOutputs::single("out", value))
    }
}

/// Emits `[left, right]`.
struct Merge {
    desc: PluginDescriptor,
}

impl Merge {
    fn new() -> anyhow::Result<Self> {
        let desc = PluginDescriptor::new(tag("merge")?, "Merge")
            .with_input(PortSchema::new("left", DataType::Any))
            .with_input(PortSchema::optional("right", DataType::Any))
            .with_output(PortSchema::new("out", DataType::List))
            .with_description("Pair two values into an array");
        Ok(Self { desc })
    }
}

#[async_trait]
impl NodePlugin for Merge {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.desc
    }

    async fn execute(&self, inv: Invocation) -> Result<NodeOutputs, PluginError> {
        let side = |port| inv.input_value(port).cloned().unwrap_or(Value::Null);
        Ok(NodeOutputs::single("out", json!([side("left"), side("right")])))
    }
}

/// Waits `ms` milliseconds, then forwards its input (or `null`).
struct Sleep {
    desc: PluginDescriptor,
}

impl Sleep {
    fn new() -> anyhow::Result<Self> {
        let desc = PluginDescriptor::new(tag("sleep")?, "Sleep")
            .with_input(PortSchema::optional("in", DataType::Any))
            .with_output(PortSchema::new("out", DataType::Any))
            .with_parameter(ParameterSpec::new("ms", ParameterKind::Number).with_default(json!(100)))
            .with_description("Wait, then forward the input value");
        Ok(Self { desc })
    }
}

#[async_trait]
impl NodePlugin for Sleep {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.desc
    }

    async fn execute(&self, inv: Invocation) -> Result<NodeOutputs, PluginError> {
        let ms = inv.param_u64("ms")?;
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(ms)) => {}
            () = inv.token.cancelled() => return Err(PluginError::Cancelled),
        }
        let value = inv.input_value("in").cloned().unwrap_or(Value::Null);
        Ok(NodeOutputs::single("out", value))
    }
}

/// Always fails. Useful for trying failure policies.
struct Fail {
    desc: PluginDescriptor,
}

impl Fail {
    fn new() -> anyhow::Result<Self> {
        let desc = PluginDescriptor::new(tag("fail")?, "Fail")
            .with_input(PortSchema::optional("in", DataType::Any))
            .with_output(PortSchema::new("out", DataType::Any))
            .with_parameter(
                ParameterSpec::new("message", ParameterKind::Text).with_default(json!("failed on purpose")),
            )
            .with_parameter(ParameterSpec::new("retryable", ParameterKind::Boolean).with_default(json!(false)))
            .with_description("Fail every attempt");
        Ok(Self { desc })
    }
}

#[async_trait]
impl NodePlugin for Fail {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.desc
    }

    async fn execute(&self, inv: Invocation) -> Result<NodeOutputs, PluginError> {
        let message = inv.param_str("message")?.to_owned();
        if inv.param("retryable").and_then(Value::as_bool).unwrap_or(false) {
            Err(PluginError::retryable(message))
        } else {
            Err(PluginError::fatal(message))
        }
    }
}

/// Registry holding every built-in plugin.
pub fn registry() -> anyhow::Result<PluginRegistry> {
    Ok(PluginRegistry::builder()
        .register(Constant::new()?)
        .register(Passthrough::new()?)
        .register(Merge::new()?)
        .register(Sleep::new()?)
        .register(Fail::new()?)
        .build()?)
}

/// A diamond: one constant fanned out to two sleeps, joined by a merge.
pub fn demo_workflow(registry: &PluginRegistry) -> anyhow::Result<WorkflowDefinition> {
    let descriptor = |raw: &'static str| -> anyhow::Result<_> {
        Ok(registry.get(&tag(raw)?)?.descriptor().clone())
    };
    let constant = descriptor("constant")?;
    let sleep = descriptor("sleep")?;
    let merge = descriptor("merge")?;

    let source = constant
        .instantiate(NodeId::v4(), "source")
        .with_parameter("value", json!({"greeting": "hello"}));
    let left = sleep
        .instantiate(NodeId::v4(), "left")
        .with_parameter("ms", json!(50));
    let right = sleep
        .instantiate(NodeId::v4(), "right")
        .with_parameter("ms", json!(80));
    let sink = merge.instantiate(NodeId::v4(), "sink");
    let (s, l, r, k) = (source.id, left.id, right.id, sink.id);

    Ok(WorkflowBuilder::new("demo-diamond")
        .description("constant -> two sleeps -> merge")
        .add_node(source)
        .add_node(left)
        .add_node(right)
        .add_node(sink)
        .connect(s, "out", l, "in")
        .connect(s, "out", r, "in")
        .connect(l, "out", k, "left")
        .connect(r, "out", k, "right")
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::RunId;

    #[test]
    fn registry_holds_every_builtin() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), 5);
        for raw in ["constant", "passthrough", "merge", "sleep", "fail"] {
            assert!(registry.contains(&tag(raw).unwrap()), "{raw}");
        }
    }

    #[test]
    fn demo_workflow_resolves_against_registry() {
        let registry = registry().unwrap();
        let wf = demo_workflow(&registry).unwrap();
        assert_eq!(wf.nodes.len(), 4);
        for node in &wf.nodes {
            assert!(registry.resolve(node).is_ok(), "{}", node.name);
        }
    }

    #[tokio::test]
    async fn fail_respects_retryable_flag() {
        let plugin = Fail::new().unwrap();
        let inv = Invocation::new(RunId::v4(), NodeId::v4())
            .with_param("message", json!("boom"))
            .with_param("retryable", json!(true));
        let err = plugin.execute(inv).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn passthrough_requires_input() {
        let plugin = Passthrough::new().unwrap();
        let err = plugin
            .execute(Invocation::new(RunId::v4(), NodeId::v4()))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
