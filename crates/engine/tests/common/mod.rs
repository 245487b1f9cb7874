//! Shared fixtures for engine integration tests.
//!
//! One scripted plugin behaves according to node parameters:
//!
//! - `fail_times`: attempts up to this number fail with a retryable error
//! - `fatal`: every attempt fails without retry
//! - `sleep_ms`: work time; cancellation is honoured unless `stubborn`
//! - `value`: what a source emits (default `1`)
//!
//! Steps add one to numeric input; joins emit `[left, right]`. Typed
//! fixtures carry narrower contracts: `test.text` emits text, `test.gauge`
//! takes a number and requires a `threshold`, and `test.fork` declares an
//! optional `extra` output it never produces.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use strata_core::{NodeId, TypeTag};
use strata_engine::{Engine, RunEvent};
use strata_runtime::{Invocation, NodeOutputs, NodePlugin, PluginDescriptor, PluginError, PluginRegistry};
use strata_workflow::{DataType, NodeDefinition, ParameterKind, ParameterSpec, PortSchema};

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// Observes what the plugins were asked to do.
#[derive(Debug, Default)]
pub struct Probe {
    running: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<NodeId>>,
}

impl Probe {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Nodes in the order their first attempt began.
    pub fn start_order(&self) -> Vec<NodeId> {
        let mut seen = Vec::new();
        for id in self.started.lock().iter() {
            if !seen.contains(id) {
                seen.push(*id);
            }
        }
        seen
    }

    /// Attempts begun for `node`.
    pub fn attempts(&self, node: NodeId) -> usize {
        self.started.lock().iter().filter(|&&id| id == node).count()
    }

    fn enter(&self, node: NodeId) -> Entered<'_> {
        self.started.lock().push(node);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Entered(self)
    }
}

/// Leaves the probe when the attempt ends, including when it is dropped
/// on timeout.
struct Entered<'a>(&'a Probe);

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Scripted plugin
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Shape {
    Source,
    Step,
    Join,
    Text,
    Gauge,
    Fork,
}

struct Scripted {
    desc: PluginDescriptor,
    shape: Shape,
    probe: Arc<Probe>,
}

impl Scripted {
    fn new(shape: Shape, probe: Arc<Probe>) -> Self {
        Self {
            desc: descriptor(shape),
            shape,
            probe,
        }
    }

    fn output(&self, inv: &Invocation) -> Value {
        match self.shape {
            Shape::Source | Shape::Fork => inv.param("value").cloned().unwrap_or(json!(1)),
            Shape::Text => json!("text"),
            Shape::Step | Shape::Gauge => match inv.input_value("in") {
                Some(Value::Number(n)) => json!(n.as_i64().unwrap_or(0) + 1),
                Some(other) => other.clone(),
                None => Value::Null,
            },
            Shape::Join => json!([
                inv.input_value("left").cloned().unwrap_or(Value::Null),
                inv.input_value("right").cloned().unwrap_or(Value::Null),
            ]),
        }
    }
}

#[async_trait]
impl NodePlugin for Scripted {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.desc
    }

    async fn execute(&self, inv: Invocation) -> Result<NodeOutputs, PluginError> {
        let _entered = self.probe.enter(inv.node_id);
        self.work(&inv).await
    }
}

impl Scripted {
    async fn work(&self, inv: &Invocation) -> Result<NodeOutputs, PluginError> {
        if let Some(ms) = inv.param("sleep_ms").and_then(Value::as_u64) {
            let sleep = tokio::time::sleep(Duration::from_millis(ms));
            if inv.param("stubborn").is_some_and(|v| v == &json!(true)) {
                sleep.await;
            } else {
                tokio::select! {
                    () = sleep => {}
                    () = inv.token.cancelled() => return Err(PluginError::Cancelled),
                }
            }
        }
        if inv.param("fatal").is_some_and(|v| v == &json!(true)) {
            return Err(PluginError::fatal("scripted fatal failure"));
        }
        let fail_times = inv.param("fail_times").and_then(Value::as_u64).unwrap_or(0);
        if u64::from(inv.attempt) <= fail_times {
            return Err(PluginError::retryable(format!("scripted failure {}", inv.attempt)));
        }
        Ok(NodeOutputs::single("out", self.output(inv)))
    }
}

fn descriptor(shape: Shape) -> PluginDescriptor {
    let (name, desc, out) = match shape {
        Shape::Source => (
            "test.source",
            PluginDescriptor::new(tag("test.source"), "Source"),
            DataType::Any,
        ),
        Shape::Step => (
            "test.step",
            PluginDescriptor::new(tag("test.step"), "Step")
                .with_input(PortSchema::new("in", DataType::Any)),
            DataType::Any,
        ),
        Shape::Join => (
            "test.join",
            PluginDescriptor::new(tag("test.join"), "Join")
                .with_input(PortSchema::new("left", DataType::Any))
                .with_input(PortSchema::new("right", DataType::Any)),
            DataType::Any,
        ),
        Shape::Text => (
            "test.text",
            PluginDescriptor::new(tag("test.text"), "Text"),
            DataType::Text,
        ),
        Shape::Gauge => (
            "test.gauge",
            PluginDescriptor::new(tag("test.gauge"), "Gauge")
                .with_input(PortSchema::new("in", DataType::Number))
                .with_parameter(ParameterSpec::new("threshold", ParameterKind::Number).required()),
            DataType::Number,
        ),
        Shape::Fork => (
            "test.fork",
            PluginDescriptor::new(tag("test.fork"), "Fork"),
            DataType::Any,
        ),
    };
    let desc = desc.with_output(PortSchema::new("out", out));
    let desc = match shape {
        Shape::Fork => desc.with_output(PortSchema::optional("extra", DataType::Any)),
        _ => desc,
    };
    desc.with_description(format!("scripted {name}"))
}

fn tag(s: &str) -> TypeTag {
    TypeTag::new(s).unwrap()
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn registry(probe: &Arc<Probe>) -> PluginRegistry {
    PluginRegistry::builder()
        .register(Scripted::new(Shape::Source, Arc::clone(probe)))
        .register(Scripted::new(Shape::Step, Arc::clone(probe)))
        .register(Scripted::new(Shape::Join, Arc::clone(probe)))
        .register(Scripted::new(Shape::Text, Arc::clone(probe)))
        .register(Scripted::new(Shape::Gauge, Arc::clone(probe)))
        .register(Scripted::new(Shape::Fork, Arc::clone(probe)))
        .build()
        .unwrap()
}

pub fn engine() -> (Engine, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    (Engine::new(registry(&probe)), probe)
}

pub fn source(name: &str) -> NodeDefinition {
    descriptor(Shape::Source).instantiate(NodeId::v4(), name)
}

pub fn step(name: &str) -> NodeDefinition {
    descriptor(Shape::Step).instantiate(NodeId::v4(), name)
}

pub fn join(name: &str) -> NodeDefinition {
    descriptor(Shape::Join).instantiate(NodeId::v4(), name)
}

pub fn text(name: &str) -> NodeDefinition {
    descriptor(Shape::Text).instantiate(NodeId::v4(), name)
}

pub fn gauge(name: &str) -> NodeDefinition {
    descriptor(Shape::Gauge).instantiate(NodeId::v4(), name)
}

pub fn fork(name: &str) -> NodeDefinition {
    descriptor(Shape::Fork).instantiate(NodeId::v4(), name)
}

/// Index of the first event matching `pred`.
pub fn position(events: &[RunEvent], pred: impl Fn(&RunEvent) -> bool) -> usize {
    events
        .iter()
        .position(pred)
        .unwrap_or_else(|| panic!("event not found in {events:#?}"))
}

pub fn succeeded(node: NodeId) -> impl Fn(&RunEvent) -> bool {
    move |e| matches!(e, RunEvent::NodeSucceeded { node_id, .. } if *node_id == node)
}

pub fn started(node: NodeId) -> impl Fn(&RunEvent) -> bool {
    move |e| matches!(e, RunEvent::NodeStarted { node_id, .. } if *node_id == node)
}

pub fn ready(node: NodeId) -> impl Fn(&RunEvent) -> bool {
    move |e| matches!(e, RunEvent::NodeReady { node_id, .. } if *node_id == node)
}
