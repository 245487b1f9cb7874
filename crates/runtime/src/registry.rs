//! Plugin registry for looking up node plugins by type tag.

use std::collections::HashMap;
use std::sync::Arc;

use strata_core::{NodeId, TypeTag};
use strata_workflow::{NodeDefinition, ValidationError, WorkflowDefinition};

use crate::error::RegistryError;
use crate::plugin::{NodePlugin, PluginDescriptor};

/// Immutable lookup table from type tag to plugin.
///
/// Built once at process start through [`PluginRegistry::builder`] and
/// shared behind an `Arc` thereafter.
///
/// # Examples
///
/// ```rust,ignore
/// use strata_runtime::PluginRegistry;
///
/// let registry = PluginRegistry::builder()
///     .register(CsvRead::new())
///     .register(Filter::new())
///     .build()?;
/// let plugin = registry.get(&"csv.read".parse()?)?;
/// ```
pub struct PluginRegistry {
    plugins: HashMap<TypeTag, Arc<dyn NodePlugin>>,
    order: Vec<TypeTag>,
}

impl PluginRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::default()
    }

    /// Look up a plugin by type tag.
    pub fn get(&self, type_tag: &TypeTag) -> Result<Arc<dyn NodePlugin>, RegistryError> {
        self.plugins
            .get(type_tag)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownType(type_tag.clone()))
    }

    /// Look up the plugin for `node` and check that the node's ports match
    /// the plugin's descriptor.
    pub fn resolve(&self, node: &NodeDefinition) -> Result<Arc<dyn NodePlugin>, RegistryError> {
        let plugin = self.get(&node.type_tag)?;
        if let Some(detail) = plugin.descriptor().port_mismatch(node) {
            return Err(RegistryError::PortContract {
                node: node.name.clone(),
                type_tag: node.type_tag.clone(),
                detail,
            });
        }
        Ok(plugin)
    }

    /// Check `workflow` against the contracts its plugins declare and
    /// return every violation.
    ///
    /// Descriptors win over the copies a graph carries:
    ///
    /// - parameter values are checked against the plugin's declarations
    /// - inputs the plugin requires must be connected
    /// - connections are type-checked on the plugins' port schemas
    ///
    /// Nodes without a registered plugin are passed over; [`resolve`](Self::resolve)
    /// reports them.
    #[must_use]
    pub fn contract_violations(&self, workflow: &WorkflowDefinition) -> Vec<ValidationError> {
        let descriptor = |id: NodeId| {
            workflow
                .node(id)
                .and_then(|n| self.plugins.get(&n.type_tag))
                .map(|p| p.descriptor())
        };

        let mut violations = Vec::new();
        for node in workflow.nodes.iter().filter(|n| n.enabled) {
            let Some(desc) = descriptor(node.id) else {
                continue;
            };
            violations.extend(desc.parameter_violations(node));
            for port in desc.inputs.iter().filter(|p| p.required) {
                if !workflow.incoming(node.id).any(|c| c.to_port == port.name) {
                    violations.push(ValidationError::MissingConnection {
                        node: node.id,
                        port: port.name.clone(),
                    });
                }
            }
        }

        for conn in &workflow.connections {
            let produced = descriptor(conn.from_node).and_then(|d| d.output(&conn.from_port));
            let accepted = descriptor(conn.to_node).and_then(|d| d.input(&conn.to_port));
            let (Some(produced), Some(accepted)) = (produced, accepted) else {
                continue;
            };
            if !accepted.data_type.accepts(produced.data_type) {
                violations.push(ValidationError::TypeMismatch {
                    from_node: conn.from_node,
                    from_port: conn.from_port.clone(),
                    to_node: conn.to_node,
                    to_port: conn.to_port.clone(),
                    expected: accepted.data_type,
                    found: produced.data_type,
                });
            }
        }
        violations
    }

    /// Like [`contract_violations`](Self::contract_violations), stopping at
    /// the first.
    pub fn check_contracts(&self, workflow: &WorkflowDefinition) -> Result<(), ValidationError> {
        match self.contract_violations(workflow).into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Check if a plugin is registered for the given type tag.
    #[must_use]
    pub fn contains(&self, type_tag: &TypeTag) -> bool {
        self.plugins.contains_key(type_tag)
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Registered type tags in registration order.
    #[must_use]
    pub fn type_tags(&self) -> &[TypeTag] {
        &self.order
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.order
            .iter()
            .filter_map(|tag| self.plugins.get(tag))
            .map(|p| p.descriptor())
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("type_tags", &self.order)
            .finish()
    }
}

/// Collects plugins for a [`PluginRegistry`].
#[derive(Default)]
pub struct PluginRegistryBuilder {
    plugins: Vec<Arc<dyn NodePlugin>>,
}

impl PluginRegistryBuilder {
    /// Add a plugin.
    #[must_use]
    pub fn register(self, plugin: impl NodePlugin + 'static) -> Self {
        self.register_arc(Arc::new(plugin))
    }

    /// Add an already shared plugin.
    #[must_use]
    pub fn register_arc(mut self, plugin: Arc<dyn NodePlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Freeze the registry. Fails if two plugins share a type tag.
    pub fn build(self) -> Result<PluginRegistry, RegistryError> {
        let mut plugins = HashMap::with_capacity(self.plugins.len());
        let mut order = Vec::with_capacity(self.plugins.len());
        for plugin in self.plugins {
            let tag = plugin.descriptor().type_tag.clone();
            if plugins.contains_key(&tag) {
                return Err(RegistryError::DuplicateType(tag));
            }
            tracing::info!(type_tag = %tag, "registered node plugin");
            order.push(tag.clone());
            plugins.insert(tag, plugin);
        }
        Ok(PluginRegistry { plugins, order })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use crate::plugin::{Invocation, NodeOutputs};
    use strata_core::NodeId;
    use strata_workflow::{DataType, PortSchema};

    /// Minimal test plugin that echoes its input.
    struct EchoPlugin {
        desc: PluginDescriptor,
    }

    impl EchoPlugin {
        fn new(tag: &str) -> Self {
            Self {
                desc: PluginDescriptor::new(TypeTag::new(tag).unwrap(), tag)
                    .with_input(PortSchema::new("in", DataType::Any))
                    .with_output(PortSchema::new("out", DataType::Any)),
            }
        }
    }

    #[async_trait::async_trait]
    impl NodePlugin for EchoPlugin {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.desc
        }

        async fn execute(&self, invocation: Invocation) -> Result<NodeOutputs, PluginError> {
            let value = invocation.input_value("in").cloned().unwrap_or_default();
            Ok(NodeOutputs::single("out", value))
        }
    }

    fn tag(s: &str) -> TypeTag {
        TypeTag::new(s).unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let reg = PluginRegistry::builder()
            .register(EchoPlugin::new("test.echo"))
            .build()
            .unwrap();

        assert!(reg.contains(&tag("test.echo")));
        assert_eq!(reg.len(), 1);
        let plugin = reg.get(&tag("test.echo")).unwrap();
        assert_eq!(plugin.descriptor().type_tag, tag("test.echo"));
    }

    #[test]
    fn lookup_missing_returns_error() {
        let reg = PluginRegistry::builder().build().unwrap();
        assert!(reg.is_empty());
        assert_eq!(
            reg.get(&tag("nonexistent")).err(),
            Some(RegistryError::UnknownType(tag("nonexistent")))
        );
    }

    #[test]
    fn duplicate_type_is_rejected() {
        let err = PluginRegistry::builder()
            .register(EchoPlugin::new("test.a"))
            .register(EchoPlugin::new("test.a"))
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateType(tag("test.a")));
    }

    #[test]
    fn type_tags_keep_registration_order() {
        let reg = PluginRegistry::builder()
            .register(EchoPlugin::new("c"))
            .register(EchoPlugin::new("a"))
            .register(EchoPlugin::new("b"))
            .build()
            .unwrap();
        assert_eq!(reg.type_tags(), &[tag("c"), tag("a"), tag("b")]);
        assert_eq!(reg.descriptors().count(), 3);
    }

    /// Emits text on `out` and declares a required numeric parameter.
    struct TextSource {
        desc: PluginDescriptor,
    }

    impl TextSource {
        fn new() -> Self {
            Self {
                desc: PluginDescriptor::new(tag("text.source"), "Text")
                    .with_output(PortSchema::new("out", DataType::Text))
                    .with_parameter(
                        strata_workflow::ParameterSpec::new(
                            "threshold",
                            strata_workflow::ParameterKind::Number,
                        )
                        .required(),
                    ),
            }
        }
    }

    #[async_trait::async_trait]
    impl NodePlugin for TextSource {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.desc
        }

        async fn execute(&self, _invocation: Invocation) -> Result<NodeOutputs, PluginError> {
            Ok(NodeOutputs::single("out", serde_json::json!("text")))
        }
    }

    /// A node copy with every port widened to `Any` and no parameter specs.
    fn loosened(desc: &PluginDescriptor, name: &str) -> NodeDefinition {
        let mut node = desc.instantiate(NodeId::v4(), name);
        node.parameter_specs.clear();
        for port in node.inputs.iter_mut().chain(node.outputs.iter_mut()) {
            port.data_type = DataType::Any;
        }
        node
    }

    #[test]
    fn contracts_come_from_descriptors_not_node_copies() {
        let mut numeric = EchoPlugin::new("numeric");
        numeric.desc.inputs = vec![PortSchema::new("in", DataType::Number)];
        let reg = PluginRegistry::builder()
            .register(TextSource::new())
            .register(numeric)
            .build()
            .unwrap();
        let desc = |raw: &str| reg.get(&tag(raw)).unwrap().descriptor().clone();

        let source = loosened(&desc("text.source"), "src");
        let sink = loosened(&desc("numeric"), "sink");
        let (src, snk) = (source.id, sink.id);
        let wf = strata_workflow::WorkflowBuilder::new("contract")
            .add_node(source)
            .add_node(sink)
            .connect(src, "out", snk, "in")
            .build()
            .unwrap();
        assert!(strata_workflow::validate_workflow(&wf).is_ok());

        let violations = reg.contract_violations(&wf);
        assert_eq!(violations.len(), 2, "{violations:?}");
        assert!(matches!(
            &violations[0],
            ValidationError::InvalidParameter { node, parameter, .. }
                if *node == src && parameter == "threshold"
        ));
        assert!(matches!(
            violations[1],
            ValidationError::TypeMismatch {
                expected: DataType::Number,
                found: DataType::Text,
                ..
            }
        ));
        assert_eq!(reg.check_contracts(&wf), Err(violations[0].clone()));
    }

    #[test]
    fn plugin_required_inputs_must_be_connected() {
        let reg = PluginRegistry::builder()
            .register(EchoPlugin::new("echo"))
            .build()
            .unwrap();
        let mut node = reg.get(&tag("echo")).unwrap().descriptor().instantiate(NodeId::v4(), "lonely");
        node.inputs[0].required = false;
        let id = node.id;
        let wf = strata_workflow::WorkflowBuilder::new("lonely")
            .add_node(node)
            .build()
            .unwrap();

        assert_eq!(
            reg.check_contracts(&wf),
            Err(ValidationError::MissingConnection {
                node: id,
                port: "in".into()
            })
        );
    }

    #[test]
    fn resolve_checks_ports() {
        let reg = PluginRegistry::builder()
            .register(EchoPlugin::new("echo"))
            .build()
            .unwrap();
        let desc = reg.get(&tag("echo")).unwrap().descriptor().clone();

        let good = desc.instantiate(NodeId::v4(), "ok");
        assert!(reg.resolve(&good).is_ok());

        let mut bad = desc.instantiate(NodeId::v4(), "bad");
        bad.inputs.clear();
        assert!(matches!(
            reg.resolve(&bad),
            Err(RegistryError::PortContract { .. })
        ));
    }
}
